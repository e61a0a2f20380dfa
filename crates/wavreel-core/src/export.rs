//! Merged timeline export
//!
//! Writes the timeline as a standard WAV file in the sample format of the
//! source recordings.

use std::io::{ Seek, Write };
use std::path::Path;

use thiserror::Error;

use crate::decoder::SampleEncoding;
use crate::timeline::MergedTimeline;


/// Errors that can occur while writing a WAV file.
#[derive( Debug, Error )]
pub enum ExportError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "WAV encode error: {0}" )]
    Encode( #[from] hound::Error ),
}


fn wav_spec( timeline: &MergedTimeline ) -> hound::WavSpec {
    let encoding = timeline.encoding();
    let sample_format = match encoding {
        SampleEncoding::Float => hound::SampleFormat::Float,
        SampleEncoding::Int( _ ) => hound::SampleFormat::Int,
    };

    hound::WavSpec {
        channels: timeline.channels(),
        sample_rate: timeline.sample_rate(),
        bits_per_sample: encoding.bits_per_sample(),
        sample_format,
    }
}


/// Scales a float sample to a signed integer of the given bit depth.
fn to_int_sample( sample: f32, bits: u16 ) -> i32 {
    let max = ( ( 1_i64 << ( bits - 1 ) ) - 1 ) as f64;
    ( sample.clamp( -1.0, 1.0 ) as f64 * max ).round() as i32
}


/// Encodes the timeline into any seekable writer.
pub fn write_wav_to<W: Write + Seek>( timeline: &MergedTimeline, writer: W ) -> Result<(), ExportError> {
    let spec = wav_spec( timeline );
    let mut wav = hound::WavWriter::new( writer, spec )?;

    match timeline.encoding() {
        SampleEncoding::Float => {
            for sample in timeline.samples() {
                wav.write_sample( *sample )?;
            }
        }
        SampleEncoding::Int( 8 ) => {
            for sample in timeline.samples() {
                wav.write_sample( to_int_sample( *sample, 8 ) as i8 )?;
            }
        }
        SampleEncoding::Int( 16 ) => {
            for sample in timeline.samples() {
                wav.write_sample( to_int_sample( *sample, 16 ) as i16 )?;
            }
        }
        SampleEncoding::Int( bits ) => {
            for sample in timeline.samples() {
                wav.write_sample( to_int_sample( *sample, bits ) )?;
            }
        }
    }

    wav.finalize()?;
    Ok(())
}


/// Writes the timeline to `path`, replacing any existing file.
pub fn write_wav( timeline: &MergedTimeline, path: &Path ) -> Result<(), ExportError> {
    let file = std::io::BufWriter::new( std::fs::File::create( path )? );
    write_wav_to( timeline, file )?;
    tracing::info!( "Exported {:.2}s timeline to {:?}", timeline.duration(), path );
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::decoder::AudioSegment;
    use crate::timeline::concatenate_segments;


    fn timeline( encoding: SampleEncoding ) -> MergedTimeline {
        let samples = vec![ 0.5, -0.5, 1.5, 0.0 ];
        let segment = AudioSegment::new( samples, 8000, 2, encoding );
        concatenate_segments( vec![ ( "a.wav".to_string(), segment ) ], 0.0 ).unwrap().0
    }


    #[test]
    fn test_export_int16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "out.wav" );
        write_wav( &timeline( SampleEncoding::Int( 16 ) ), &path ).unwrap();

        let mut reader = hound::WavReader::open( &path ).unwrap();
        let spec = reader.spec();
        assert_eq!( spec.channels, 2 );
        assert_eq!( spec.sample_rate, 8000 );
        assert_eq!( spec.bits_per_sample, 16 );

        let samples: Vec<i16> = reader.samples::<i16>().map( |s| s.unwrap() ).collect();
        assert_eq!( samples, vec![ 16384, -16384, 32767, 0 ] );
    }


    #[test]
    fn test_export_float() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "out.wav" );
        write_wav( &timeline( SampleEncoding::Float ), &path ).unwrap();

        let mut reader = hound::WavReader::open( &path ).unwrap();
        assert_eq!( reader.spec().sample_format, hound::SampleFormat::Float );
        let samples: Vec<f32> = reader.samples::<f32>().map( |s| s.unwrap() ).collect();
        assert_eq!( samples, vec![ 0.5, -0.5, 1.5, 0.0 ] );
    }


    #[test]
    fn test_export_int8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "out.wav" );
        write_wav( &timeline( SampleEncoding::Int( 8 ) ), &path ).unwrap();

        let mut reader = hound::WavReader::open( &path ).unwrap();
        assert_eq!( reader.spec().bits_per_sample, 8 );
        let samples: Vec<i8> = reader.samples::<i8>().map( |s| s.unwrap() ).collect();
        assert_eq!( samples, vec![ 64, -64, 127, 0 ] );
    }


    #[test]
    fn test_export_int24_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "out.wav" );
        write_wav( &timeline( SampleEncoding::Int( 24 ) ), &path ).unwrap();

        let reader = hound::WavReader::open( &path ).unwrap();
        assert_eq!( reader.spec().bits_per_sample, 24 );
        assert_eq!( reader.duration(), 2 );
    }
}
