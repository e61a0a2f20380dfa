//! Application settings management
//!
//! Persistent defaults for the gap length, progress rate, seek step and
//! the external player used without an audio device.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use wavreel_core::player::{ self, PlayerConfig, DEFAULT_GAP_SECONDS };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Silence between recordings, in seconds
    pub gap_seconds: f64,

    /// Progress update interval while playing
    pub poll_interval_ms: u64,

    /// Distance moved by the Left/Right keys, in seconds
    pub seek_step_seconds: f64,

    /// External player for whole-file playback; platform default if unset
    pub fallback_command: Option<Vec<String>>,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            gap_seconds: DEFAULT_GAP_SECONDS,
            poll_interval_ms: 100,
            seek_step_seconds: 5.0,
            fallback_command: None,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "wavreel" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    ///
    /// Writes the defaults out on first run so they can be edited.
    pub fn load() -> Self {
        let path = match Self::settings_path() {
            Some( p ) => p,
            None => return Self::default(),
        };

        if !path.exists() {
            let settings = Self::default();
            settings.save();
            return settings;
        }

        match fs::read_to_string( &path ) {
            Ok( contents ) => Self::from_json( &contents ),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    fn from_json( contents: &str ) -> Self {
        serde_json::from_str( contents ).unwrap_or_else( |e| {
            tracing::warn!( "Invalid settings file, using defaults: {}", e );
            Self::default()
        })
    }


    /// Saves settings to disk.
    pub fn save( &self ) {
        let path = match Self::settings_path() {
            Some( p ) => p,
            None => return,
        };

        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( &path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Builds the core config, applying command-line overrides.
    pub fn player_config( &self, gap_override: Option<f64>, whole_file_only: bool ) -> PlayerConfig {
        PlayerConfig {
            gap_seconds: gap_override.unwrap_or( self.gap_seconds ),
            poll_interval: Duration::from_millis( self.poll_interval_ms.max( 1 ) ),
            whole_file_only,
            fallback_command: self.fallback_command
                .clone()
                .filter( |c| !c.is_empty() )
                .unwrap_or_else( player::default_fallback_command ),
        }
    }


    /// Seek step, never negative.
    pub fn seek_step( &self ) -> f64 {
        if self.seek_step_seconds.is_finite() {
            self.seek_step_seconds.abs()
        } else {
            5.0
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_json( r#"{ "gap_seconds": 1.0 }"# );
        assert_eq!( settings.gap_seconds, 1.0 );
        assert_eq!( settings.poll_interval_ms, 100 );
        assert_eq!( settings.seek_step_seconds, 5.0 );
    }


    #[test]
    fn test_invalid_file_uses_defaults() {
        assert_eq!( Settings::from_json( "not json" ), Settings::default() );
    }


    #[test]
    fn test_player_config_overrides() {
        let settings = Settings {
            fallback_command: Some( vec![ "mpv".into(), "--no-video".into() ] ),
            ..Settings::default()
        };

        let config = settings.player_config( Some( 0.5 ), true );
        assert_eq!( config.gap_seconds, 0.5 );
        assert!( config.whole_file_only );
        assert_eq!( config.poll_interval, Duration::from_millis( 100 ) );
        assert_eq!( config.fallback_command, vec![ "mpv", "--no-video" ] );

        let config = Settings::default().player_config( None, false );
        assert_eq!( config.gap_seconds, 3.0 );
        assert_eq!( config.fallback_command, player::default_fallback_command() );
    }
}
