//! Player facade
//!
//! Opens a folder of recordings and wires up everything a front end needs:
//! the merged timeline, its position index and a playback session.

use std::path::{ Path, PathBuf };
use std::time::Duration;

use thiserror::Error;

use crate::backend;
use crate::export::{ self, ExportError };
use crate::index::PositionIndex;
use crate::library::{ self, LibraryError };
use crate::session::{ PlaybackSession, DEFAULT_POLL_INTERVAL };
use crate::timeline::{ self, MergedTimeline, TimelineError };


/// Default silence between consecutive recordings, in seconds.
pub const DEFAULT_GAP_SECONDS: f64 = 3.0;


/// Errors that can occur while opening a folder.
#[derive( Debug, Error )]
pub enum PlayerError {
    #[error( transparent )]
    Library( #[from] LibraryError ),

    #[error( transparent )]
    Timeline( #[from] TimelineError ),
}


/// Settings used when opening a folder.
#[derive( Debug, Clone, PartialEq )]
pub struct PlayerConfig {
    /// Silence inserted between consecutive files.
    pub gap_seconds: f64,

    /// Delay between progress updates while playing.
    pub poll_interval: Duration,

    /// Skip the audio device and always use the external player.
    pub whole_file_only: bool,

    /// External player used without seek support. `{path}` is replaced by
    /// the exported WAV; without it the path is appended.
    pub fallback_command: Vec<String>,
}


impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            gap_seconds: DEFAULT_GAP_SECONDS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            whole_file_only: false,
            fallback_command: default_fallback_command(),
        }
    }
}


/// Platform command-line WAV player.
pub fn default_fallback_command() -> Vec<String> {
    let parts: &[&str] = if cfg!( target_os = "macos" ) {
        &[ "afplay" ]
    } else if cfg!( target_os = "windows" ) {
        &[
            "powershell",
            "-NoProfile",
            "-Command",
            "(New-Object Media.SoundPlayer '{path}').PlaySync()",
        ]
    } else {
        &[ "aplay", "-q" ]
    };
    parts.iter().map( |s| s.to_string() ).collect()
}


/// A folder of recordings ready to play.
pub struct Player {
    files: Vec<PathBuf>,
    session: PlaybackSession,
}


impl Player {
    /// Scans `dir`, concatenates its WAV files and prepares playback.
    pub fn open( dir: &Path, config: &PlayerConfig ) -> Result<Self, PlayerError> {
        let files = library::scan_wav_files( dir )?;
        let ( timeline, index ) = timeline::concatenate( &files, config.gap_seconds )?;

        let backend = backend::select_backend(
            config.whole_file_only,
            config.fallback_command.clone(),
        );

        let session = PlaybackSession::new( timeline, index, backend, config.poll_interval );
        Ok( Self { files, session } )
    }


    /// Source files in timeline order.
    pub fn files( &self ) -> &[PathBuf] {
        &self.files
    }


    pub fn session( &self ) -> &PlaybackSession {
        &self.session
    }


    pub fn timeline( &self ) -> &MergedTimeline {
        self.session.timeline()
    }


    pub fn index( &self ) -> &PositionIndex {
        self.session.index()
    }


    /// Writes the merged timeline to a WAV file.
    pub fn export( &self, path: &Path ) -> Result<(), ExportError> {
        export::write_wav( self.timeline(), path )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn write_tone( path: &Path, rate: u32, seconds: f64 ) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create( path, spec ).unwrap();
        for i in 0..( seconds * rate as f64 ) as usize {
            writer.write_sample( if i % 2 == 0 { 1000_i16 } else { -1000 } ).unwrap();
        }
        writer.finalize().unwrap();
    }


    fn config() -> PlayerConfig {
        PlayerConfig {
            whole_file_only: true,
            fallback_command: vec![ "true".into() ],
            ..PlayerConfig::default()
        }
    }


    #[test]
    fn test_default_config() {
        let config = PlayerConfig::default();
        assert_eq!( config.gap_seconds, 3.0 );
        assert_eq!( config.poll_interval, Duration::from_millis( 100 ) );
        assert!( !config.whole_file_only );
        assert!( !config.fallback_command.is_empty() );
    }


    #[test]
    fn test_open_empty_folder_is_no_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = Player::open( dir.path(), &config() );
        assert!( matches!( result, Err( PlayerError::Timeline( TimelineError::NoInput ) ) ) );
    }


    #[test]
    fn test_open_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let result = Player::open( &dir.path().join( "gone" ), &config() );
        assert!( matches!( result, Err( PlayerError::Library( LibraryError::NotFound( _ ) ) ) ) );
    }


    #[test]
    fn test_open_builds_index_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_tone( &dir.path().join( "b.wav" ), 8000, 3.5 );
        write_tone( &dir.path().join( "a.wav" ), 8000, 2.0 );
        write_tone( &dir.path().join( "c.wav" ), 8000, 1.0 );
        std::fs::write( dir.path().join( "notes.txt" ), "skip me" ).unwrap();

        let player = Player::open( dir.path(), &config() ).unwrap();
        assert_eq!( player.files().len(), 3 );

        let names: Vec<&str> = player.index()
            .entries()
            .iter()
            .map( |e| e.file_name.as_str() )
            .collect();
        assert_eq!( names, vec![ "a.wav", "b.wav", "c.wav" ] );
        assert!( ( player.timeline().duration() - 12.5 ).abs() < 1e-6 );
        assert!( player.session().degraded_mode() );
    }


    #[test]
    fn test_export_writes_merged_file() {
        let dir = tempfile::tempdir().unwrap();
        write_tone( &dir.path().join( "a.wav" ), 8000, 1.0 );
        write_tone( &dir.path().join( "b.wav" ), 8000, 1.0 );

        let player = Player::open( dir.path(), &PlayerConfig { gap_seconds: 0.5, ..config() } ).unwrap();
        let out = dir.path().join( "merged.out" );
        player.export( &out ).unwrap();

        let reader = hound::WavReader::open( &out ).unwrap();
        assert_eq!( reader.duration(), 8000 * 2 + 4000 );
    }
}
