//! Channel and sample-rate conversion
//!
//! Used twice: offline, to bring every source recording to the timeline's
//! format before concatenation, and as a stream while feeding an output
//! device that runs at a different rate than the timeline.

use rubato::{ FastFixedIn, FastFixedOut, PolynomialDegree, Resampler };
use thiserror::Error;


/// Frames handed to rubato per call.
const CHUNK_FRAMES: usize = 1024;


/// Errors that can occur while resampling.
#[derive( Debug, Error )]
pub enum ResampleError {
    #[error( "Failed to create resampler: {0}" )]
    Construction( String ),

    #[error( "Resample error: {0}" )]
    Process( String ),
}


/// Converts planar samples to interleaved format.
/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
pub fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    if channels.is_empty() || channels[ 0 ].is_empty() {
        return Vec::new();
    }
    let frames = channels[ 0 ].len();
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
    out
}


/// Splits interleaved samples into one vector per channel.
pub fn deinterleave( samples: &[f32], channels: usize ) -> Vec<Vec<f32>> {
    let channels = channels.max( 1 );
    let mut planar: Vec<Vec<f32>> = ( 0..channels )
        .map( |_| Vec::with_capacity( samples.len() / channels ) )
        .collect();
    for frame in samples.chunks_exact( channels ) {
        for ( ch, sample ) in frame.iter().enumerate() {
            planar[ ch ].push( *sample );
        }
    }
    planar
}


/// Converts interleaved samples between channel layouts.
///
/// Mono is duplicated across outputs, anything down to mono is averaged,
/// other layouts keep the leading channels and repeat the last one.
pub fn remix( samples: &[f32], src_ch: usize, out_ch: usize ) -> Vec<f32> {
    let src_ch = src_ch.max( 1 );
    let out_ch = out_ch.max( 1 );
    if src_ch == out_ch {
        return samples.to_vec();
    }

    let frames = samples.len() / src_ch;
    let mut out = Vec::with_capacity( frames * out_ch );

    for frame in samples.chunks_exact( src_ch ) {
        if src_ch == 1 {
            out.extend( std::iter::repeat( frame[ 0 ] ).take( out_ch ) );
        } else if out_ch == 1 {
            out.push( frame.iter().sum::<f32>() / src_ch as f32 );
        } else {
            for ch in 0..out_ch {
                out.push( frame[ ch.min( src_ch - 1 ) ] );
            }
        }
    }

    out
}


/// Resamples a whole interleaved buffer.
///
/// The result has exactly `round(frames * to_rate / from_rate)` frames, with
/// the resampler's delay removed, so durations survive the conversion.
pub fn resample(
    samples: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, ResampleError> {
    let channels = channels.max( 1 );
    if from_rate == to_rate || samples.is_empty() {
        return Ok( samples.to_vec() );
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let frames = samples.len() / channels;
    let expected = ( frames as f64 * ratio ).round() as usize;

    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Cubic,
        CHUNK_FRAMES,
        channels,
    ).map_err( |e| ResampleError::Construction( e.to_string() ) )?;

    let delay = resampler.output_delay();
    let input = deinterleave( samples, channels );
    let mut output: Vec<Vec<f32>> = ( 0..channels )
        .map( |_| Vec::with_capacity( expected + delay ) )
        .collect();

    let append = |output: &mut Vec<Vec<f32>>, chunk: Vec<Vec<f32>>| {
        for ( dst, src ) in output.iter_mut().zip( chunk ) {
            dst.extend( src );
        }
    };

    let mut pos = 0;
    while frames - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = input.iter().map( |ch| &ch[ pos..pos + needed ] ).collect();
        let resampled = resampler
            .process( &chunk, None )
            .map_err( |e| ResampleError::Process( e.to_string() ) )?;
        append( &mut output, resampled );
        pos += needed;
    }

    if pos < frames {
        let rest: Vec<&[f32]> = input.iter().map( |ch| &ch[ pos.. ] ).collect();
        let resampled = resampler
            .process_partial( Some( rest.as_slice() ), None )
            .map_err( |e| ResampleError::Process( e.to_string() ) )?;
        append( &mut output, resampled );
    }

    // Push the delayed tail out of the filter
    let mut flushes = 0;
    while output[ 0 ].len() < expected + delay && flushes < 8 {
        let resampled = resampler
            .process_partial::<Vec<f32>>( None, None )
            .map_err( |e| ResampleError::Process( e.to_string() ) )?;
        append( &mut output, resampled );
        flushes += 1;
    }

    for ch in output.iter_mut() {
        ch.drain( ..delay.min( ch.len() ) );
        ch.resize( expected, 0.0 );
    }

    Ok( interleave( &output ) )
}


/// Incremental resampler for feeding an output device.
pub struct StreamResampler {
    resampler: FastFixedOut<f32>,
    pending: Vec<Vec<f32>>,
}


impl StreamResampler {
    pub fn new( from_rate: u32, to_rate: u32, channels: usize ) -> Result<Self, ResampleError> {
        let channels = channels.max( 1 );
        let resampler = FastFixedOut::<f32>::new(
            to_rate as f64 / from_rate as f64,
            2.0,
            PolynomialDegree::Cubic,
            CHUNK_FRAMES,
            channels,
        ).map_err( |e| ResampleError::Construction( e.to_string() ) )?;

        Ok( Self {
            resampler,
            pending: ( 0..channels ).map( |_| Vec::new() ).collect(),
        })
    }


    /// Queues interleaved input and returns whatever output is ready.
    pub fn push( &mut self, samples: &[f32] ) -> Result<Vec<f32>, ResampleError> {
        let channels = self.pending.len();
        for frame in samples.chunks_exact( channels ) {
            for ( ch, sample ) in frame.iter().enumerate() {
                self.pending[ ch ].push( *sample );
            }
        }

        let mut out = Vec::new();
        while self.pending[ 0 ].len() >= self.resampler.input_frames_next() {
            let needed = self.resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.pending
                .iter_mut()
                .map( |ch| ch.drain( ..needed ).collect() )
                .collect();
            let resampled = self.resampler
                .process( &chunk, None )
                .map_err( |e| ResampleError::Process( e.to_string() ) )?;
            out.extend( interleave( &resampled ) );
        }

        Ok( out )
    }


    /// Drains the remaining queued input.
    pub fn flush( &mut self ) -> Result<Vec<f32>, ResampleError> {
        if self.pending[ 0 ].is_empty() {
            return Ok( Vec::new() );
        }
        let channels = self.pending.len();
        let rest = std::mem::replace(
            &mut self.pending,
            ( 0..channels ).map( |_| Vec::new() ).collect(),
        );
        let resampled = self.resampler
            .process_partial( Some( rest.as_slice() ), None )
            .map_err( |e| ResampleError::Process( e.to_string() ) )?;
        Ok( interleave( &resampled ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave_round_trip() {
        let samples = vec![ 1.0, -1.0, 2.0, -2.0, 3.0, -3.0 ];
        let planar = deinterleave( &samples, 2 );
        assert_eq!( planar, vec![ vec![ 1.0, 2.0, 3.0 ], vec![ -1.0, -2.0, -3.0 ] ] );
        assert_eq!( interleave( &planar ), samples );
    }


    #[test]
    fn test_remix_mono_to_stereo() {
        assert_eq!( remix( &[ 0.5, 0.25 ], 1, 2 ), vec![ 0.5, 0.5, 0.25, 0.25 ] );
    }


    #[test]
    fn test_remix_stereo_to_mono() {
        assert_eq!( remix( &[ 1.0, 0.0, 0.5, 0.5 ], 2, 1 ), vec![ 0.5, 0.5 ] );
    }


    #[test]
    fn test_remix_stereo_to_quad_repeats_last() {
        assert_eq!( remix( &[ 0.1, 0.2 ], 2, 4 ), vec![ 0.1, 0.2, 0.2, 0.2 ] );
    }


    #[test]
    fn test_resample_preserves_duration() {
        let samples = vec![ 0.0_f32; 22_050 * 2 ];
        let out = resample( &samples, 2, 22_050, 44_100 ).unwrap();
        assert_eq!( out.len(), 44_100 * 2 );

        let out = resample( &samples, 2, 22_050, 16_000 ).unwrap();
        assert_eq!( out.len(), 16_000 * 2 );
    }


    #[test]
    fn test_resample_same_rate_is_copy() {
        let samples = vec![ 0.1, 0.2, 0.3 ];
        assert_eq!( resample( &samples, 1, 8000, 8000 ).unwrap(), samples );
    }


    #[test]
    fn test_stream_resampler_produces_output() {
        let mut resampler = StreamResampler::new( 8000, 16_000, 1 ).unwrap();
        let mut produced = resampler.push( &vec![ 0.0; 8000 ] ).unwrap().len();
        produced += resampler.flush().unwrap().len();
        assert!( produced >= 12_000 );
    }
}
