//! Timeline concatenation
//!
//! Joins the source recordings into one PCM buffer with fixed silent gaps
//! between them, and records where each recording landed.

use std::path::{ Path, PathBuf };

use thiserror::Error;

use crate::decoder::{ self, AudioSegment, DecoderError, SampleEncoding };
use crate::index::{ PositionEntry, PositionIndex };
use crate::resample::{ self, ResampleError };


/// Errors that abort building a timeline. No partial timeline is produced.
#[derive( Debug, Error )]
pub enum TimelineError {
    #[error( "No WAV files to concatenate" )]
    NoInput,

    #[error( "Failed to decode {path:?}: {source}" )]
    Decode {
        path: PathBuf,
        #[source]
        source: DecoderError,
    },

    #[error( "Failed to convert {file} to the timeline format: {source}" )]
    Resample {
        file: String,
        #[source]
        source: ResampleError,
    },
}


/// The merged PCM buffer. Read-only once built.
#[derive( Debug, Clone, PartialEq )]
pub struct MergedTimeline {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    encoding: SampleEncoding,
}


impl MergedTimeline {
    /// Interleaved samples of the whole timeline.
    pub fn samples( &self ) -> &[f32] {
        &self.samples
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> u16 {
        self.channels
    }


    /// Sample format of the first source recording.
    pub fn encoding( &self ) -> SampleEncoding {
        self.encoding
    }


    pub fn frames( &self ) -> usize {
        self.samples.len() / self.channels as usize
    }


    /// Total duration in seconds.
    pub fn duration( &self ) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }


    /// Frame index for an offset in seconds, clamped to the buffer.
    pub fn frame_at( &self, offset: f64 ) -> usize {
        if !( offset > 0.0 ) {
            return 0;
        }
        ( ( offset * self.sample_rate as f64 ) as usize ).min( self.frames() )
    }


    /// Interleaved samples starting at `frame`.
    pub fn samples_from( &self, frame: usize ) -> &[f32] {
        let start = frame.min( self.frames() ) * self.channels as usize;
        &self.samples[ start.. ]
    }
}


/// Incremental concatenation.
///
/// The first pushed segment fixes the sample rate, channel layout and
/// encoding; later segments are converted to match. Each segment is
/// dropped as soon as it has been appended.
#[derive( Debug )]
pub struct TimelineBuilder {
    gap_seconds: f64,
    format: Option<( u32, u16, SampleEncoding )>,
    samples: Vec<f32>,
    entries: Vec<PositionEntry>,
}


impl TimelineBuilder {
    /// Creates a builder. Negative or non-finite gaps are treated as zero.
    pub fn new( gap_seconds: f64 ) -> Self {
        let gap_seconds = if gap_seconds.is_finite() && gap_seconds > 0.0 {
            gap_seconds
        } else {
            0.0
        };

        Self {
            gap_seconds,
            format: None,
            samples: Vec::new(),
            entries: Vec::new(),
        }
    }


    /// Appends a segment, preceded by a gap unless it is the first.
    pub fn push( &mut self, file_name: &str, segment: AudioSegment ) -> Result<(), TimelineError> {
        if segment.frames() == 0 {
            tracing::warn!( "Skipping {}: no audio frames", file_name );
            return Ok(());
        }

        let ( rate, channels, _ ) = *self.format.get_or_insert((
            segment.sample_rate(),
            segment.channels(),
            segment.encoding(),
        ));

        let samples = Self::conform( file_name, segment, rate, channels )?;

        if !self.entries.is_empty() {
            let gap_frames = ( self.gap_seconds * rate as f64 ).round() as usize;
            self.samples.resize( self.samples.len() + gap_frames * channels as usize, 0.0 );
        }

        let start_frame = self.samples.len() / channels as usize;
        self.samples.extend_from_slice( &samples );
        let end_frame = self.samples.len() / channels as usize;

        let entry = PositionEntry::new(
            file_name,
            start_frame as f64 / rate as f64,
            end_frame as f64 / rate as f64,
        );
        tracing::debug!( "Placed {} at {:.3}s..{:.3}s", file_name, entry.start, entry.end );
        self.entries.push( entry );

        Ok(())
    }


    /// Converts a segment to the timeline's channel layout and sample rate.
    fn conform(
        file_name: &str,
        segment: AudioSegment,
        rate: u32,
        channels: u16,
    ) -> Result<Vec<f32>, TimelineError> {
        let src_rate = segment.sample_rate();
        let src_channels = segment.channels();

        let samples = if src_channels != channels {
            tracing::info!(
                "Remixing {} from {} to {} channels",
                file_name,
                src_channels,
                channels
            );
            resample::remix( segment.samples(), src_channels as usize, channels as usize )
        } else {
            segment.into_samples()
        };

        if src_rate == rate {
            return Ok( samples );
        }

        tracing::info!( "Resampling {}: {} Hz → {} Hz", file_name, src_rate, rate );
        resample::resample( &samples, channels as usize, src_rate, rate )
            .map_err( |source| TimelineError::Resample {
                file: file_name.to_string(),
                source,
            })
    }


    /// Finishes the timeline. Fails with `NoInput` if nothing was pushed.
    pub fn finish( self ) -> Result<( MergedTimeline, PositionIndex ), TimelineError> {
        let ( sample_rate, channels, encoding ) = self.format.ok_or( TimelineError::NoInput )?;
        if self.entries.is_empty() {
            return Err( TimelineError::NoInput );
        }

        let timeline = MergedTimeline {
            samples: self.samples,
            sample_rate,
            channels,
            encoding,
        };

        tracing::info!(
            "Built timeline: {} files, {:.2}s, {} Hz, {} channels",
            self.entries.len(),
            timeline.duration(),
            sample_rate,
            channels
        );

        Ok(( timeline, PositionIndex::new( self.entries ) ))
    }
}


/// Decodes and concatenates `files` in order with `gap_seconds` of silence
/// between consecutive files.
///
/// Any unreadable file aborts the whole operation.
pub fn concatenate<P: AsRef<Path>>(
    files: &[P],
    gap_seconds: f64,
) -> Result<( MergedTimeline, PositionIndex ), TimelineError> {
    if files.is_empty() {
        return Err( TimelineError::NoInput );
    }

    let mut builder = TimelineBuilder::new( gap_seconds );
    for path in files {
        let path = path.as_ref();
        let segment = decoder::decode_segment( path )
            .map_err( |source| TimelineError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        let file_name = path
            .file_name()
            .map( |n| n.to_string_lossy().to_string() )
            .unwrap_or_else( || path.to_string_lossy().to_string() );

        builder.push( &file_name, segment )?;
    }

    builder.finish()
}


/// Concatenates already decoded segments.
pub fn concatenate_segments(
    segments: Vec<( String, AudioSegment )>,
    gap_seconds: f64,
) -> Result<( MergedTimeline, PositionIndex ), TimelineError> {
    let mut builder = TimelineBuilder::new( gap_seconds );
    for ( name, segment ) in segments {
        builder.push( &name, segment )?;
    }
    builder.finish()
}


#[cfg( test )]
mod tests {
    use super::*;


    const RATE: u32 = 8000;


    fn tone( seconds: f64, rate: u32, channels: u16 ) -> AudioSegment {
        let frames = ( seconds * rate as f64 ).round() as usize;
        let samples = ( 0..frames * channels as usize )
            .map( |i| if i % 2 == 0 { 0.25 } else { -0.25 } )
            .collect();
        AudioSegment::new( samples, rate, channels, SampleEncoding::Int( 16 ) )
    }


    fn write_wav( path: &Path, seconds: f64, rate: u32, channels: u16 ) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create( path, spec ).unwrap();
        let frames = ( seconds * rate as f64 ).round() as usize;
        for i in 0..frames * channels as usize {
            writer.write_sample( if i % 2 == 0 { 4000_i16 } else { -4000 } ).unwrap();
        }
        writer.finalize().unwrap();
    }


    #[test]
    fn test_three_files_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = [ ( "1.wav", 2.0 ), ( "2.wav", 3.5 ), ( "3.wav", 1.0 ) ]
            .iter()
            .map( |( name, secs )| {
                let path = dir.path().join( name );
                write_wav( &path, *secs, RATE, 1 );
                path
            })
            .collect();

        let ( timeline, index ) = concatenate( &files, 3.0 ).unwrap();

        assert!( ( timeline.duration() - 12.5 ).abs() < 1e-9 );
        assert_eq!( index.len(), 3 );
        assert_eq!( index.resolve( 1.0 ), Some( "1.wav" ) );
        assert_eq!( index.resolve( 3.0 ), None );
        assert_eq!( index.resolve( 6.5 ), Some( "2.wav" ) );
        assert_eq!( index.resolve( 12.0 ), Some( "3.wav" ) );
    }


    #[test]
    fn test_entries_sorted_and_disjoint() {
        let segments = vec![
            ( "a".to_string(), tone( 0.5, RATE, 2 ) ),
            ( "b".to_string(), tone( 1.25, RATE, 2 ) ),
            ( "c".to_string(), tone( 0.1, RATE, 2 ) ),
            ( "d".to_string(), tone( 2.0, RATE, 2 ) ),
        ];
        let ( timeline, index ) = concatenate_segments( segments, 0.75 ).unwrap();

        let entries = index.entries();
        for pair in entries.windows( 2 ) {
            assert!( pair[ 0 ].start < pair[ 0 ].end );
            assert!( pair[ 0 ].end <= pair[ 1 ].start );
            assert!( ( pair[ 1 ].start - pair[ 0 ].end - 0.75 ).abs() < 1e-9 );
        }

        let expected = 0.5 + 1.25 + 0.1 + 2.0 + 0.75 * 3.0;
        assert!( ( timeline.duration() - expected ).abs() < 1e-9 );
        assert_eq!( entries.last().unwrap().end, timeline.duration() );
    }


    #[test]
    fn test_gaps_are_silent() {
        let segments = vec![
            ( "a".to_string(), tone( 1.0, RATE, 1 ) ),
            ( "b".to_string(), tone( 1.0, RATE, 1 ) ),
        ];
        let ( timeline, _ ) = concatenate_segments( segments, 0.5 ).unwrap();

        let gap = &timeline.samples()[ RATE as usize..( RATE as usize * 3 / 2 ) ];
        assert!( gap.iter().all( |s| *s == 0.0 ) );
        assert_eq!( timeline.samples()[ RATE as usize * 3 / 2 ], 0.25 );
    }


    #[test]
    fn test_empty_input_fails() {
        let files: Vec<PathBuf> = Vec::new();
        assert!( matches!( concatenate( &files, 3.0 ), Err( TimelineError::NoInput ) ) );
        assert!( matches!( concatenate_segments( Vec::new(), 3.0 ), Err( TimelineError::NoInput ) ) );
    }


    #[test]
    fn test_corrupt_file_aborts_merge() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join( "a.wav" );
        let bad = dir.path().join( "b.wav" );
        write_wav( &good, 1.0, RATE, 1 );
        std::fs::write( &bad, b"RIFF but not really" ).unwrap();

        match concatenate( &[ good, bad.clone() ], 3.0 ) {
            Err( TimelineError::Decode { path, .. } ) => assert_eq!( path, bad ),
            other => panic!( "expected decode error, got {:?}", other.map( |_| () ) ),
        }
    }


    /// IMA ADPCM file whose only block header carries an out-of-range step index.
    fn write_corrupt_adpcm( path: &Path ) {
        const BLOCK_ALIGN: u16 = 256;
        let mut bytes = Vec::new();
        bytes.extend_from_slice( b"RIFF" );
        bytes.extend_from_slice( &( 4 + 8 + 20 + 8 + BLOCK_ALIGN as u32 ).to_le_bytes() );
        bytes.extend_from_slice( b"WAVE" );

        bytes.extend_from_slice( b"fmt " );
        bytes.extend_from_slice( &20_u32.to_le_bytes() );
        bytes.extend_from_slice( &0x0011_u16.to_le_bytes() );  // IMA ADPCM
        bytes.extend_from_slice( &1_u16.to_le_bytes() );
        bytes.extend_from_slice( &RATE.to_le_bytes() );
        bytes.extend_from_slice( &4055_u32.to_le_bytes() );
        bytes.extend_from_slice( &BLOCK_ALIGN.to_le_bytes() );
        bytes.extend_from_slice( &4_u16.to_le_bytes() );
        bytes.extend_from_slice( &2_u16.to_le_bytes() );
        bytes.extend_from_slice( &505_u16.to_le_bytes() );

        bytes.extend_from_slice( b"data" );
        bytes.extend_from_slice( &( BLOCK_ALIGN as u32 ).to_le_bytes() );
        let mut block = vec![ 0_u8; BLOCK_ALIGN as usize ];
        block[ 2 ] = 0xFF;  // step index, valid range is 0..=88
        bytes.extend_from_slice( &block );

        std::fs::write( path, bytes ).unwrap();
    }


    #[test]
    fn test_corrupt_packet_aborts_merge() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join( "a.wav" );
        let bad = dir.path().join( "b.wav" );
        write_wav( &good, 1.0, RATE, 1 );
        write_corrupt_adpcm( &bad );

        match concatenate( &[ good, bad.clone() ], 3.0 ) {
            Err( TimelineError::Decode { path, source: DecoderError::Decode( _ ) } ) => {
                assert_eq!( path, bad );
            }
            other => panic!( "expected packet decode error, got {:?}", other.map( |_| () ) ),
        }
    }


    #[test]
    fn test_mixed_formats_conform_to_first() {
        let segments = vec![
            ( "stereo".to_string(), tone( 1.0, 16_000, 2 ) ),
            ( "mono".to_string(), tone( 2.0, 8000, 1 ) ),
        ];
        let ( timeline, index ) = concatenate_segments( segments, 1.0 ).unwrap();

        assert_eq!( timeline.sample_rate(), 16_000 );
        assert_eq!( timeline.channels(), 2 );
        assert!( ( timeline.duration() - 4.0 ).abs() < 1e-9 );
        assert!( ( index.entries()[ 1 ].duration() - 2.0 ).abs() < 1e-9 );
    }


    #[test]
    fn test_zero_length_segment_skipped() {
        let segments = vec![
            ( "a".to_string(), tone( 1.0, RATE, 1 ) ),
            ( "empty".to_string(), AudioSegment::new( Vec::new(), RATE, 1, SampleEncoding::Int( 16 ) ) ),
            ( "b".to_string(), tone( 1.0, RATE, 1 ) ),
        ];
        let ( timeline, index ) = concatenate_segments( segments, 1.0 ).unwrap();

        assert_eq!( index.len(), 2 );
        assert!( ( timeline.duration() - 3.0 ).abs() < 1e-9 );
    }


    #[test]
    fn test_negative_gap_is_zero() {
        let segments = vec![
            ( "a".to_string(), tone( 1.0, RATE, 1 ) ),
            ( "b".to_string(), tone( 1.0, RATE, 1 ) ),
        ];
        let ( timeline, index ) = concatenate_segments( segments, -2.0 ).unwrap();

        assert!( ( timeline.duration() - 2.0 ).abs() < 1e-9 );
        assert_eq!( index.entries()[ 1 ].start, 1.0 );
    }


    #[test]
    fn test_frame_at_clamps() {
        let ( timeline, _ ) = concatenate_segments(
            vec![ ( "a".to_string(), tone( 2.0, RATE, 2 ) ) ],
            0.0,
        ).unwrap();

        assert_eq!( timeline.frame_at( -1.0 ), 0 );
        assert_eq!( timeline.frame_at( f64::NAN ), 0 );
        assert_eq!( timeline.frame_at( 0.5 ), 4000 );
        assert_eq!( timeline.frame_at( 99.0 ), timeline.frames() );
        assert_eq!( timeline.samples_from( 4000 ).len(), 4000 * 2 * 3 );
        assert!( timeline.samples_from( 999_999 ).is_empty() );
    }
}
