//! Audio output via cpal
//!
//! Sends timeline PCM to the system audio device.

use std::collections::VecDeque;
use std::sync::{ Arc, Mutex };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get default stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Returns true if the default host has an output device.
pub fn output_device_available() -> bool {
    cpal::default_host().default_output_device().is_some()
}


/// Bounded sample queue between the feeding thread and the audio callback.
///
/// Converts from the source channel layout to the device layout on the way out.
pub struct SampleBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    source_channels: usize,
    output_channels: usize,
}


impl SampleBuffer {
    /// Creates a buffer holding at most `capacity` source samples.
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
        }
    }


    /// Pushes as many samples as fit. Returns the number accepted.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut buf = self.buffer.lock().unwrap();
        let available = self.capacity.saturating_sub( buf.len() );
        // Only whole frames, so channels never drift out of alignment
        let to_push = ( samples.len().min( available ) / self.source_channels ) * self.source_channels;
        buf.extend( samples[ ..to_push ].iter().copied() );
        to_push
    }


    /// Fills `output` with converted frames, padding with silence.
    /// Returns the number of output samples that carried audio.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        let mut buf = self.buffer.lock().unwrap();
        let src_ch = self.source_channels;
        let out_ch = self.output_channels;

        let output_frames = output.len() / out_ch;
        let frames = output_frames.min( buf.len() / src_ch );

        for frame in 0..frames {
            let out = &mut output[ frame * out_ch..( frame + 1 ) * out_ch ];
            if src_ch == out_ch {
                for sample in out.iter_mut() {
                    *sample = buf.pop_front().unwrap_or( 0.0 );
                }
            } else if src_ch == 1 {
                let sample = buf.pop_front().unwrap_or( 0.0 );
                out.fill( sample );
            } else if out_ch == 1 {
                let sum: f32 = buf.drain( ..src_ch ).sum();
                out[ 0 ] = sum / src_ch as f32;
            } else {
                let mut last = 0.0;
                for ch in 0..src_ch {
                    let sample = buf.pop_front().unwrap_or( 0.0 );
                    if ch < out_ch {
                        out[ ch ] = sample;
                    }
                    last = sample;
                }
                for sample in out.iter_mut().skip( src_ch ) {
                    *sample = last;
                }
            }
        }

        let written = frames * out_ch;
        output[ written.. ].fill( 0.0 );
        written
    }


    pub fn len( &self ) -> usize {
        self.buffer.lock().unwrap().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.buffer.lock().unwrap().is_empty()
    }
}


/// Audio output handler.
///
/// Not Send: cpal streams must stay on the thread that built them.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}


impl AudioOutput {
    /// Opens the default device for the given source format.
    ///
    /// Returns the output and the buffer the caller should push samples into.
    pub fn new(
        source_sample_rate: u32,
        source_channels: u16,
    ) -> Result<( Self, Arc<SampleBuffer> ), OutputError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        // Priority: 1) exact match, 2) same sample rate any channels, 3) device default
        let supported_configs: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate && c.max_sample_rate().0 >= source_sample_rate
        };

        let config = if let Some( supported ) = supported_configs
            .iter()
            .find( |c| c.channels() == source_channels && supports_rate( *c ) )
        {
            supported.clone()
                .with_sample_rate( cpal::SampleRate( source_sample_rate ) )
                .config()
        } else if let Some( supported ) = supported_configs.iter().find( |c| supports_rate( *c ) ) {
            tracing::info!(
                "Channel conversion: timeline has {} channels, device using {}",
                source_channels,
                supported.channels()
            );
            supported.clone()
                .with_sample_rate( cpal::SampleRate( source_sample_rate ) )
                .config()
        } else {
            let default_config = device
                .default_output_config()
                .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?;
            tracing::info!(
                "Device does not support {} Hz, resampling to {} Hz",
                source_sample_rate,
                default_config.sample_rate().0
            );
            default_config.config()
        };

        tracing::info!(
            "Audio output config: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        // ~500ms of audio
        let buffer_capacity = ( config.sample_rate.0 as usize ) * ( source_channels as usize ) / 2;
        let sample_buffer = Arc::new( SampleBuffer::new(
            buffer_capacity,
            source_channels,
            config.channels,
        ));
        let sample_buffer_clone = Arc::clone( &sample_buffer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    sample_buffer_clone.pop( data );
                },
                |err| {
                    tracing::error!( "Audio output error: {}", err );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok((
            Self {
                stream,
                sample_rate: config.sample_rate.0,
            },
            sample_buffer,
        ))
    }


    /// Starts audio output.
    pub fn play( &self ) -> Result<(), OutputError> {
        self.stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Actual device sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_push_respects_capacity() {
        let buffer = SampleBuffer::new( 4, 2, 2 );
        assert_eq!( buffer.push( &[ 0.1; 6 ] ), 4 );
        assert_eq!( buffer.push( &[ 0.1; 2 ] ), 0 );
        assert_eq!( buffer.len(), 4 );
    }


    #[test]
    fn test_push_whole_frames_only() {
        let buffer = SampleBuffer::new( 5, 2, 2 );
        assert_eq!( buffer.push( &[ 0.1; 6 ] ), 4 );
    }


    #[test]
    fn test_pop_pads_with_silence() {
        let buffer = SampleBuffer::new( 16, 2, 2 );
        buffer.push( &[ 0.5, -0.5 ] );

        let mut out = [ 1.0; 6 ];
        assert_eq!( buffer.pop( &mut out ), 2 );
        assert_eq!( out, [ 0.5, -0.5, 0.0, 0.0, 0.0, 0.0 ] );
        assert!( buffer.is_empty() );
    }


    #[test]
    fn test_pop_mono_to_stereo() {
        let buffer = SampleBuffer::new( 16, 1, 2 );
        buffer.push( &[ 0.25, 0.75 ] );

        let mut out = [ 0.0; 4 ];
        assert_eq!( buffer.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.25, 0.25, 0.75, 0.75 ] );
    }


    #[test]
    fn test_pop_stereo_to_mono() {
        let buffer = SampleBuffer::new( 16, 2, 1 );
        buffer.push( &[ 1.0, 0.0, 0.5, 0.5 ] );

        let mut out = [ 0.0; 2 ];
        assert_eq!( buffer.pop( &mut out ), 2 );
        assert_eq!( out, [ 0.5, 0.5 ] );
    }


    #[test]
    fn test_pop_stereo_to_quad() {
        let buffer = SampleBuffer::new( 16, 2, 4 );
        buffer.push( &[ 0.1, 0.2 ] );

        let mut out = [ 0.0; 4 ];
        buffer.pop( &mut out );
        assert_eq!( out, [ 0.1, 0.2, 0.2, 0.2 ] );
    }
}
