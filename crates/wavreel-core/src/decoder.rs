//! WAV decoding via Symphonia
//!
//! Reads each source recording fully into memory as interleaved f32 PCM.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    Decoder as SymphoniaDecoder,
    DecoderOptions,
    CODEC_TYPE_NULL,
    CODEC_TYPE_PCM_F32BE,
    CODEC_TYPE_PCM_F32LE,
    CODEC_TYPE_PCM_F64BE,
    CODEC_TYPE_PCM_F64LE,
};
use symphonia::core::formats::{ FormatOptions, FormatReader };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;
use thiserror::Error;


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),
}


/// How samples are stored in the source file.
///
/// Decoding always yields f32; this is kept so an export can reproduce
/// the input format.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SampleEncoding {
    /// Signed (or 8-bit unsigned) integer PCM with the given bit depth.
    Int( u16 ),

    /// IEEE float PCM, exported as 32-bit float.
    Float,
}


impl SampleEncoding {
    /// Bit depth used when writing this encoding.
    pub fn bits_per_sample( &self ) -> u16 {
        match self {
            SampleEncoding::Int( bits ) => *bits,
            SampleEncoding::Float => 32,
        }
    }
}


impl Default for SampleEncoding {
    fn default() -> Self {
        SampleEncoding::Int( 16 )
    }
}


/// A fully decoded source recording.
#[derive( Debug, Clone, PartialEq )]
pub struct AudioSegment {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    encoding: SampleEncoding,
}


impl AudioSegment {
    /// Creates a segment from interleaved samples.
    pub fn new( samples: Vec<f32>, sample_rate: u32, channels: u16, encoding: SampleEncoding ) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max( 1 ),
            encoding,
        }
    }


    pub fn samples( &self ) -> &[f32] {
        &self.samples
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> u16 {
        self.channels
    }


    pub fn encoding( &self ) -> SampleEncoding {
        self.encoding
    }


    /// Number of frames (samples per channel).
    pub fn frames( &self ) -> usize {
        self.samples.len() / self.channels as usize
    }


    /// Duration in seconds.
    pub fn duration( &self ) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }


    /// Consumes the segment, returning its interleaved samples.
    pub fn into_samples( self ) -> Vec<f32> {
        self.samples
    }
}


/// Streaming decoder wrapper around Symphonia.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    encoding: SampleEncoding,
    sample_buf: Option<SampleBuffer<f32>>,
}


impl Decoder {
    /// Opens an audio file for decoding.
    pub fn open( path: &Path ) -> Result<Self, DecoderError> {
        let file = File::open( path )?;
        let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions::default() );

        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| DecoderError::UnsupportedFormat )?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );

        let is_float = matches!(
            codec_params.codec,
            CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE | CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE
        ) || matches!( codec_params.sample_format, Some( SampleFormat::F32 ) | Some( SampleFormat::F64 ) );

        let encoding = if is_float {
            SampleEncoding::Float
        } else {
            // Round odd depths up to one a WAV writer can reproduce
            let bits = match codec_params.bits_per_sample.unwrap_or( 16 ) {
                0..=8 => 8,
                9..=16 => 16,
                17..=24 => 24,
                _ => 32,
            };
            SampleEncoding::Int( bits )
        };

        tracing::debug!(
            "Opened {:?}: {} Hz, {} channels, {:?}",
            path,
            sample_rate,
            channels,
            encoding
        );

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            encoding,
            sample_buf: None,
        })
    }


    /// Decodes the next packet and returns interleaved f32 samples.
    ///
    /// Returns None when EOF is reached.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( symphonia::core::errors::Error::IoError( ref e ) )
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok( None );
                }
                Err( e ) => {
                    return Err( DecoderError::Decode( e.to_string() ) );
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            // A corrupt packet fails the whole file
            let decoded = self.decoder
                .decode( &packet )
                .map_err( |e| DecoderError::Decode( e.to_string() ) )?;

            let spec = *decoded.spec();
            let num_frames = decoded.frames();

            if self.sample_buf.as_ref().map_or( true, |b| b.capacity() < num_frames ) {
                self.sample_buf = Some( SampleBuffer::new( num_frames as u64, spec ) );
            }
            let sample_buf = self.sample_buf
                .get_or_insert_with( || SampleBuffer::new( num_frames as u64, spec ) );
            sample_buf.copy_interleaved_ref( decoded );

            return Ok( Some( sample_buf.samples().to_vec() ) );
        }
    }


    /// Decodes the remainder of the stream into a single segment.
    pub fn decode_to_end( mut self ) -> Result<AudioSegment, DecoderError> {
        let mut samples = Vec::new();
        while let Some( chunk ) = self.decode_next()? {
            samples.extend_from_slice( &chunk );
        }

        Ok( AudioSegment::new( samples, self.sample_rate, self.channels as u16, self.encoding ) )
    }
}


/// Decodes a whole file into memory.
pub fn decode_segment( path: &Path ) -> Result<AudioSegment, DecoderError> {
    Decoder::open( path )?.decode_to_end()
}


#[cfg( test )]
mod tests {
    use super::*;


    fn write_wav( path: &Path, rate: u32, channels: u16, frames: usize ) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create( path, spec ).unwrap();
        for i in 0..frames * channels as usize {
            writer.write_sample( ( ( i % 100 ) as i16 - 50 ) * 100 ).unwrap();
        }
        writer.finalize().unwrap();
    }


    #[test]
    fn test_decode_segment_reads_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "a.wav" );
        write_wav( &path, 8000, 2, 12_000 );

        let segment = decode_segment( &path ).unwrap();
        assert_eq!( segment.sample_rate(), 8000 );
        assert_eq!( segment.channels(), 2 );
        assert_eq!( segment.frames(), 12_000 );
        assert_eq!( segment.encoding(), SampleEncoding::Int( 16 ) );
        assert!( ( segment.duration() - 1.5 ).abs() < 1e-9 );
    }


    #[test]
    fn test_decode_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = decode_segment( &dir.path().join( "nope.wav" ) );
        assert!( matches!( result, Err( DecoderError::FileOpen( _ ) ) ) );
    }


    #[test]
    fn test_decode_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "junk.wav" );
        std::fs::write( &path, b"definitely not a riff header" ).unwrap();

        let result = decode_segment( &path );
        assert!( matches!( result, Err( DecoderError::UnsupportedFormat ) ) );
    }


    #[test]
    fn test_bits_per_sample() {
        assert_eq!( SampleEncoding::Int( 24 ).bits_per_sample(), 24 );
        assert_eq!( SampleEncoding::Float.bits_per_sample(), 32 );
        assert_eq!( SampleEncoding::default().bits_per_sample(), 16 );
    }


    #[test]
    fn test_segment_duration_zero_rate() {
        let segment = AudioSegment::new( vec![ 0.0; 10 ], 0, 1, SampleEncoding::Float );
        assert_eq!( segment.duration(), 0.0 );
    }
}
