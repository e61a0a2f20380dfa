//! Log file setup.
//!
//! The TUI owns the terminal, so logs go to
//! `<data_local_dir>/wavreel/wavreel.log`, filtered by `WAVREEL_LOG`.

use std::fs::{ self, OpenOptions };
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{ Context, Result };
use tracing_subscriber::EnvFilter;


const FILTER_ENV: &str = "WAVREEL_LOG";


fn log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map( |p| p.join( "wavreel" ).join( "wavreel.log" ) )
}


/// Installs the global subscriber. Returns the log file path.
pub fn init() -> Result<PathBuf> {
    let path = log_path().context( "No local data directory" )?;
    if let Some( parent ) = path.parent() {
        fs::create_dir_all( parent )
            .with_context( || format!( "Failed to create {}", parent.display() ) )?;
    }

    let file = OpenOptions::new()
        .create( true )
        .append( true )
        .open( &path )
        .with_context( || format!( "Failed to open {}", path.display() ) )?;

    let filter = EnvFilter::try_from_env( FILTER_ENV )
        .unwrap_or_else( |_| EnvFilter::new( "info" ) );

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_ansi( false )
        .with_thread_names( true )
        .with_writer( Mutex::new( file ) )
        .try_init()
        .map_err( |e| anyhow::anyhow!( "Failed to initialize logging: {}", e ) )?;

    Ok( path )
}
