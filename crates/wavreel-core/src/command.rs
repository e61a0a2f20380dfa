//! Slash command parsing.
//!
//! Commands typed after `/` in the TUI. Parsing lives here so the
//! front end only has to map each variant onto a session call.

use std::path::PathBuf;

use thiserror::Error;


/// Errors that can occur during command parsing or execution.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),

    #[error( "Execution failed: {0}" )]
    ExecutionFailed( String ),
}


/// Parsed slash command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Playback commands
    /// Start playing, from `from` seconds if given, else from the playhead.
    Play { from: Option<f64> },
    Pause,
    Stop,
    Seek { position: f64 },
    Next,
    Prev,

    // Timeline commands
    Export { path: PathBuf },

    // UI commands
    Help,
    Quit,
}


impl Command {
    /// Parses a command string (without the leading `/`).
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Playback commands
            "play" | "p" => {
                let from = args.map( parse_time ).transpose()?;
                Ok( Command::Play { from } )
            }
            "pause" | "pa" => Ok( Command::Pause ),
            "stop" | "st" => Ok( Command::Stop ),
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                let position = parse_time( time_str )?;
                Ok( Command::Seek { position } )
            }
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),

            // Timeline commands
            "export" | "ex" | "save" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "output path".into() ) )?;
                Ok( Command::Export { path: PathBuf::from( path ) } )
            }

            // UI commands
            "help" | "h" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Play { .. } => "Start playback",
            Command::Pause => "Pause playback",
            Command::Stop => "Stop and rewind",
            Command::Seek { .. } => "Seek to position",
            Command::Next => "Jump to next file",
            Command::Prev => "Jump to previous file",
            Command::Export { .. } => "Write merged timeline to a WAV file",
            Command::Help => "Show help",
            Command::Quit => "Quit application",
        }
    }
}


/// Parses a time string like "1:30", "1:30.5", "90" or "12.25" into seconds.
pub fn parse_time( s: &str ) -> Result<f64, CommandError> {
    let s = s.trim();

    let seconds = if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: f64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        if !( 0.0..60.0 ).contains( &seconds ) {
            return Err( CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) );
        }
        minutes as f64 * 60.0 + seconds
    } else {
        s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err( CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) );
    }
    Ok( seconds )
}


/// Returns help text listing all available commands.
pub fn help_text() -> String {
    let entries = [
        ( "/play [time]", Command::Play { from: None }, "Space" ),
        ( "/pause", Command::Pause, "Space" ),
        ( "/stop", Command::Stop, "s" ),
        ( "/seek <time>", Command::Seek { position: 0.0 }, "Left/Right" ),
        ( "/next", Command::Next, "n" ),
        ( "/prev", Command::Prev, "p" ),
        ( "/export <path>", Command::Export { path: PathBuf::new() }, "" ),
        ( "/help", Command::Help, "?" ),
        ( "/quit", Command::Quit, "q" ),
    ];

    let mut text = String::from( "Commands:\n" );
    for ( usage, cmd, key ) in &entries {
        let key = if key.is_empty() { String::new() } else { format!( "[{}]", key ) };
        text.push_str( &format!( "  {:<16}{:<38}{}\n", usage, cmd.description(), key ) );
    }
    text.push_str( "\nTimes: 95, 12.5, 1:35 or 1:35.5" );
    text
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play_without_time() {
        let cmd = Command::parse( "play" ).unwrap();
        assert_eq!( cmd, Command::Play { from: None } );
    }


    #[test]
    fn test_parse_play_alias_with_time() {
        let cmd = Command::parse( "p 1:05" ).unwrap();
        assert_eq!( cmd, Command::Play { from: Some( 65.0 ) } );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: 90.0 } );
    }


    #[test]
    fn test_parse_seek_fractional() {
        let cmd = Command::parse( "sk 12.25" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: 12.25 } );

        let cmd = Command::parse( "seek 0:07.5" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: 7.5 } );
    }


    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!( Command::parse( "  STOP " ).unwrap(), Command::Stop );
        assert_eq!( Command::parse( "Next" ).unwrap(), Command::Next );
    }


    #[test]
    fn test_parse_export() {
        let cmd = Command::parse( "export out/all.wav" ).unwrap();
        assert_eq!( cmd, Command::Export { path: PathBuf::from( "out/all.wav" ) } );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "seek" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "export  " ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for cmd in [
            Command::Play { from: None },
            Command::Pause,
            Command::Stop,
            Command::Seek { position: 1.0 },
            Command::Next,
            Command::Prev,
            Command::Export { path: PathBuf::from( "x.wav" ) },
            Command::Help,
            Command::Quit,
        ] {
            assert!( help.contains( cmd.description() ), "missing {:?}", cmd );
        }
        assert!( help.contains( "/seek <time>" ) );
    }


    #[test]
    fn test_execution_failed_message() {
        let err = CommandError::ExecutionFailed( "seeking is unavailable".into() );
        assert_eq!( err.to_string(), "Execution failed: seeking is unavailable" );
    }


    #[test]
    fn test_parse_time_rejects_bad_input() {
        assert!( parse_time( "-3" ).is_err() );
        assert!( parse_time( "1:75" ).is_err() );
        assert!( parse_time( "abc" ).is_err() );
        assert!( parse_time( "inf" ).is_err() );
    }
}
