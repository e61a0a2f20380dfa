//! Command-line argument parsing for Wavreel.

use std::path::PathBuf;

use clap::Parser;


/// Wavreel - join a folder of WAV recordings and scrub through them.
#[derive( Parser, Debug )]
#[command( name = "wavreel" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Folder containing the WAV recordings.
    #[arg( default_value = "outputs" )]
    pub dir: PathBuf,

    /// Seconds of silence between recordings (overrides settings).
    #[arg( short, long )]
    pub gap: Option<f64>,

    /// Play through an external player; seeking is disabled.
    #[arg( short, long )]
    pub whole_file: bool,

    /// Write the merged timeline to a WAV file and exit.
    #[arg( short, long, value_name = "PATH" )]
    pub export: Option<PathBuf>,

    /// Print where each recording lies in the timeline and exit.
    #[arg( short, long )]
    pub index: bool,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from([ "wavreel" ]).unwrap();
        assert_eq!( args.dir, PathBuf::from( "outputs" ) );
        assert_eq!( args.gap, None );
        assert!( !args.whole_file );
        assert!( !args.index );
    }


    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "wavreel", "takes", "--gap", "1.5", "-w", "--export", "all.wav",
        ]).unwrap();
        assert_eq!( args.dir, PathBuf::from( "takes" ) );
        assert_eq!( args.gap, Some( 1.5 ) );
        assert!( args.whole_file );
        assert_eq!( args.export, Some( PathBuf::from( "all.wav" ) ) );
    }
}
