//! Playback backends
//!
//! A session drives audio through a `PlaybackBackend`, picked once when the
//! session is built:
//!
//! - `SeekablePlayback` streams the timeline to a cpal device from any frame.
//! - `WholeFilePlayback` hands an exported WAV to an external player and can
//!   only play it from the beginning.

use std::path::PathBuf;
use std::process::{ Child, Command, Stdio };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ mpsc, Arc, Mutex };
use std::thread;
use std::time::Duration;

use tempfile::TempPath;
use thiserror::Error;

use crate::export::{ self, ExportError };
use crate::output::{ self, AudioOutput, OutputError, SampleBuffer };
use crate::resample::StreamResampler;
use crate::timeline::MergedTimeline;


/// Placeholder in a fallback command replaced by the exported file path.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Frames copied to the output buffer per feed step.
const FEED_FRAMES: usize = 1024;


/// Errors raised when starting playback.
#[derive( Debug, Error )]
pub enum PlaybackError {
    #[error( "Playback unavailable: {0}" )]
    Unavailable( String ),

    #[error( "Audio output error: {0}" )]
    Output( #[from] OutputError ),

    #[error( "Failed to export timeline: {0}" )]
    Export( #[from] ExportError ),

    #[error( "Failed to start player: {0}" )]
    Spawn( #[from] std::io::Error ),
}


/// A running playback started by a backend.
pub trait PlaybackHandle: Send {
    /// Returns false once the audio has finished or been stopped.
    fn is_playing( &mut self ) -> bool;

    /// Stops the audio. Must not block for longer than a few milliseconds.
    fn stop( &mut self );
}


/// Something that can play a merged timeline.
pub trait PlaybackBackend: Send + Sync {
    /// Short name for logs and status display.
    fn name( &self ) -> &'static str;

    /// False if playback always starts at the beginning of the timeline.
    fn supports_seek( &self ) -> bool;

    /// Starts playing `timeline` at `from_frame`.
    ///
    /// Backends without seek support ignore `from_frame`.
    fn start(
        &self,
        timeline: &Arc<MergedTimeline>,
        from_frame: usize,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError>;
}


/// Picks the best backend available on this machine.
///
/// Falls back to whole-file playback when there is no output device or
/// `whole_file_only` is set.
pub fn select_backend( whole_file_only: bool, fallback_command: Vec<String> ) -> Box<dyn PlaybackBackend> {
    if whole_file_only {
        tracing::info!( "Whole-file playback requested" );
        return Box::new( WholeFilePlayback::new( fallback_command ) );
    }

    match SeekablePlayback::detect() {
        Ok( backend ) => {
            tracing::info!( "Using seekable playback" );
            Box::new( backend )
        }
        Err( e ) => {
            tracing::warn!( "{}; falling back to whole-file playback without seeking", e );
            Box::new( WholeFilePlayback::new( fallback_command ) )
        }
    }
}


/// Streams the timeline to the default cpal output device.
#[derive( Debug, Default )]
pub struct SeekablePlayback;


impl SeekablePlayback {
    /// Returns the backend if an output device exists.
    pub fn detect() -> Result<Self, PlaybackError> {
        if output::output_device_available() {
            Ok( Self )
        } else {
            Err( PlaybackError::Unavailable( "no audio output device".into() ) )
        }
    }
}


impl PlaybackBackend for SeekablePlayback {
    fn name( &self ) -> &'static str {
        "device"
    }


    fn supports_seek( &self ) -> bool {
        true
    }


    fn start(
        &self,
        timeline: &Arc<MergedTimeline>,
        from_frame: usize,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let finished = Arc::new( AtomicBool::new( false ) );
        let ( ready_tx, ready_rx ) = mpsc::channel();

        let timeline = Arc::clone( timeline );
        let stop_flag_clone = Arc::clone( &stop_flag );
        let finished_clone = Arc::clone( &finished );

        // The cpal stream is built, played and dropped on this thread
        let thread = thread::Builder::new()
            .name( "wavreel-output".into() )
            .spawn( move || {
                output_loop( timeline, from_frame, stop_flag_clone, finished_clone, ready_tx );
            })?;

        let mut handle = DeviceHandle {
            stop_flag,
            finished,
            thread: Some( thread ),
        };

        match ready_rx.recv() {
            Ok( Ok(()) ) => Ok( Box::new( handle ) ),
            Ok( Err( e ) ) => {
                handle.stop();
                Err( PlaybackError::Output( e ) )
            }
            Err( _ ) => {
                handle.stop();
                Err( PlaybackError::Unavailable( "output thread exited during setup".into() ) )
            }
        }
    }
}


/// Handle to a running device stream.
struct DeviceHandle {
    stop_flag: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}


impl PlaybackHandle for DeviceHandle {
    fn is_playing( &mut self ) -> bool {
        !self.finished.load( Ordering::Acquire )
    }


    fn stop( &mut self ) {
        self.stop_flag.store( true, Ordering::Release );
    }
}


impl Drop for DeviceHandle {
    fn drop( &mut self ) {
        self.stop_flag.store( true, Ordering::Release );
        // The output loop checks the flag every few milliseconds
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


/// Pushes all of `samples`, waiting for room. Returns false if stopped first.
fn push_all( buffer: &SampleBuffer, samples: &[f32], stop_flag: &AtomicBool ) -> bool {
    let mut offset = 0;
    while offset < samples.len() {
        if stop_flag.load( Ordering::Acquire ) {
            return false;
        }
        let pushed = buffer.push( &samples[ offset.. ] );
        offset += pushed;
        if pushed == 0 {
            thread::sleep( Duration::from_millis( 5 ) );
        }
    }
    true
}


/// Feeds the timeline from `from_frame` into a freshly opened device.
fn output_loop(
    timeline: Arc<MergedTimeline>,
    from_frame: usize,
    stop_flag: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<(), OutputError>>,
) {
    let source_rate = timeline.sample_rate();
    let channels = timeline.channels() as usize;

    let output = AudioOutput::new( source_rate, timeline.channels() )
        .and_then( |( output, buffer )| output.play().map( |_| ( output, buffer ) ) );

    let ( output, buffer ) = match output {
        Ok( pair ) => pair,
        Err( e ) => {
            let _ = ready_tx.send( Err( e ) );
            finished.store( true, Ordering::Release );
            return;
        }
    };
    let _ = ready_tx.send( Ok(()) );

    let mut resampler = if output.sample_rate() != source_rate {
        match StreamResampler::new( source_rate, output.sample_rate(), channels ) {
            Ok( r ) => Some( r ),
            Err( e ) => {
                // Audible pitch shift, but better than silence
                tracing::error!( "{}; playing at the device rate", e );
                None
            }
        }
    } else {
        None
    };

    // Keep about 50ms queued ahead of the callback
    let target_buffer = ( output.sample_rate() as usize * channels ) / 20;
    let mut completed = true;

    for chunk in timeline.samples_from( from_frame ).chunks( FEED_FRAMES * channels ) {
        while buffer.len() > target_buffer && !stop_flag.load( Ordering::Acquire ) {
            thread::sleep( Duration::from_millis( 5 ) );
        }

        let pushed = match resampler.as_mut() {
            Some( r ) => match r.push( chunk ) {
                Ok( samples ) => push_all( &buffer, &samples, &stop_flag ),
                Err( e ) => {
                    tracing::error!( "{}", e );
                    push_all( &buffer, chunk, &stop_flag )
                }
            },
            None => push_all( &buffer, chunk, &stop_flag ),
        };

        if !pushed {
            completed = false;
            break;
        }
    }

    if completed {
        if let Some( r ) = resampler.as_mut() {
            match r.flush() {
                Ok( tail ) => {
                    push_all( &buffer, &tail, &stop_flag );
                }
                Err( e ) => tracing::error!( "Final resample error: {}", e ),
            }
        }

        while !buffer.is_empty() && !stop_flag.load( Ordering::Acquire ) {
            thread::sleep( Duration::from_millis( 10 ) );
        }
        tracing::debug!( "Output loop: reached end of timeline" );
    }

    finished.store( true, Ordering::Release );
    tracing::debug!( "Output loop: exiting" );
}


/// Plays an exported copy of the timeline with an external command.
///
/// The export happens on the first `start` and is reused afterwards. The
/// temporary file is removed when the backend is dropped.
pub struct WholeFilePlayback {
    command: Vec<String>,
    exported: Mutex<Option<TempPath>>,
}


impl WholeFilePlayback {
    /// `command` is the program and its arguments. The file path replaces
    /// any `{path}` argument, or is appended if there is none.
    pub fn new( command: Vec<String> ) -> Self {
        Self {
            command,
            exported: Mutex::new( None ),
        }
    }


    fn exported_path( &self, timeline: &MergedTimeline ) -> Result<PathBuf, PlaybackError> {
        let mut exported = self.exported.lock().unwrap();
        if let Some( path ) = exported.as_ref() {
            return Ok( path.to_path_buf() );
        }

        let path = tempfile::Builder::new()
            .prefix( "wavreel-" )
            .suffix( ".wav" )
            .tempfile()
            .map_err( ExportError::from )?
            .into_temp_path();
        export::write_wav( timeline, &path )?;

        let path_buf = path.to_path_buf();
        *exported = Some( path );
        Ok( path_buf )
    }


    fn build_command( &self, path: &std::path::Path ) -> Result<Command, PlaybackError> {
        let ( program, args ) = self.command
            .split_first()
            .ok_or_else( || PlaybackError::Unavailable( "no fallback player configured".into() ) )?;

        let path_str = path.to_string_lossy();
        let mut command = Command::new( program );
        let mut substituted = false;
        for arg in args {
            if arg.contains( PATH_PLACEHOLDER ) {
                command.arg( arg.replace( PATH_PLACEHOLDER, &path_str ) );
                substituted = true;
            } else {
                command.arg( arg );
            }
        }
        if !substituted {
            command.arg( path );
        }

        command
            .stdin( Stdio::null() )
            .stdout( Stdio::null() )
            .stderr( Stdio::null() );
        Ok( command )
    }
}


impl PlaybackBackend for WholeFilePlayback {
    fn name( &self ) -> &'static str {
        "whole-file"
    }


    fn supports_seek( &self ) -> bool {
        false
    }


    fn start(
        &self,
        timeline: &Arc<MergedTimeline>,
        _from_frame: usize,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
        let path = self.exported_path( timeline )?;
        let child = self.build_command( &path )?.spawn()?;
        tracing::info!( "Started {:?} on {:?}", self.command.first(), path );
        Ok( Box::new( ProcessHandle { child } ) )
    }
}


/// Handle to an external player process.
struct ProcessHandle {
    child: Child,
}


impl PlaybackHandle for ProcessHandle {
    fn is_playing( &mut self ) -> bool {
        matches!( self.child.try_wait(), Ok( None ) )
    }


    fn stop( &mut self ) {
        if self.is_playing() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}


impl Drop for ProcessHandle {
    fn drop( &mut self ) {
        self.stop();
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::decoder::{ AudioSegment, SampleEncoding };
    use crate::timeline::concatenate_segments;


    fn timeline() -> Arc<MergedTimeline> {
        let segment = AudioSegment::new( vec![ 0.0; 800 ], 8000, 1, SampleEncoding::Int( 16 ) );
        Arc::new( concatenate_segments( vec![ ( "a.wav".into(), segment ) ], 0.0 ).unwrap().0 )
    }


    #[test]
    fn test_build_command_substitutes_placeholder() {
        let backend = WholeFilePlayback::new( vec![
            "player".into(),
            "--file={path}".into(),
            "-q".into(),
        ]);
        let command = backend.build_command( std::path::Path::new( "/tmp/x.wav" ) ).unwrap();
        let args: Vec<_> = command.get_args().map( |a| a.to_string_lossy().to_string() ).collect();
        assert_eq!( args, vec![ "--file=/tmp/x.wav", "-q" ] );
    }


    #[test]
    fn test_build_command_appends_path() {
        let backend = WholeFilePlayback::new( vec![ "aplay".into(), "-q".into() ] );
        let command = backend.build_command( std::path::Path::new( "/tmp/x.wav" ) ).unwrap();
        assert_eq!( command.get_program(), "aplay" );
        let args: Vec<_> = command.get_args().map( |a| a.to_string_lossy().to_string() ).collect();
        assert_eq!( args, vec![ "-q", "/tmp/x.wav" ] );
    }


    #[test]
    fn test_empty_command_is_unavailable() {
        let backend = WholeFilePlayback::new( Vec::new() );
        let result = backend.start( &timeline(), 0 );
        assert!( matches!( result, Err( PlaybackError::Unavailable( _ ) ) ) );
    }


    #[test]
    fn test_export_is_reused_and_cleaned_up() {
        let backend = WholeFilePlayback::new( Vec::new() );
        let timeline = timeline();

        let first = backend.exported_path( &timeline ).unwrap();
        let second = backend.exported_path( &timeline ).unwrap();
        assert_eq!( first, second );
        assert!( first.exists() );

        drop( backend );
        assert!( !first.exists() );
    }


    #[test]
    fn test_missing_program_fails_to_spawn() {
        let backend = WholeFilePlayback::new( vec![ "wavreel-no-such-player-binary".into() ] );
        let result = backend.start( &timeline(), 0 );
        assert!( matches!( result, Err( PlaybackError::Spawn( _ ) ) ) );
    }


    #[test]
    fn test_whole_file_reports_no_seek() {
        assert!( !WholeFilePlayback::new( Vec::new() ).supports_seek() );
        assert!( SeekablePlayback.supports_seek() );
    }
}
