//! Source folder scanning
//!
//! Finds the WAV recordings that make up a timeline. The name-sorted
//! order returned here is the order they are concatenated in.

use std::path::{ Path, PathBuf };

use thiserror::Error;


/// Errors that can occur while listing a source folder.
#[derive( Debug, Error )]
pub enum LibraryError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Not a directory: {0}" )]
    NotADirectory( PathBuf ),
}


/// Lists the `.wav` files directly inside `dir`, sorted by name.
///
/// Subdirectories are not descended into. An empty folder yields an
/// empty list; rejecting that is left to the concatenation step.
pub fn scan_wav_files( dir: &Path ) -> Result<Vec<PathBuf>, LibraryError> {
    let entries = match std::fs::read_dir( dir ) {
        Ok( e ) => e,
        Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err( LibraryError::NotFound( dir.to_path_buf() ) );
        }
        Err( _ ) if dir.is_file() => {
            return Err( LibraryError::NotADirectory( dir.to_path_buf() ) );
        }
        Err( e ) => return Err( LibraryError::Io( e ) ),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_wav_file( &path ) {
            files.push( path );
        }
    }

    files.sort();
    tracing::info!( "Found {} WAV files in {:?}", files.len(), dir );
    Ok( files )
}


/// Checks for a `.wav` extension, ignoring case.
pub fn is_wav_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| e.eq_ignore_ascii_case( "wav" ) )
        .unwrap_or( false )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_scan_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in [ "b.wav", "a.WAV", "c.mp3", "notes.txt", "10.wav" ] {
            std::fs::write( dir.path().join( name ), b"" ).unwrap();
        }
        std::fs::create_dir( dir.path().join( "nested.wav" ) ).unwrap();

        let files = scan_wav_files( dir.path() ).unwrap();
        let names: Vec<_> = files
            .iter()
            .map( |p| p.file_name().unwrap().to_string_lossy().to_string() )
            .collect();

        assert_eq!( names, vec![ "10.wav", "a.WAV", "b.wav" ] );
    }


    #[test]
    fn test_scan_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!( scan_wav_files( dir.path() ).unwrap().is_empty() );
    }


    #[test]
    fn test_scan_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join( "outputs" );
        assert!( matches!( scan_wav_files( &missing ), Err( LibraryError::NotFound( _ ) ) ) );
    }


    #[test]
    fn test_is_wav_file() {
        assert!( is_wav_file( Path::new( "take1.wav" ) ) );
        assert!( is_wav_file( Path::new( "TAKE1.Wav" ) ) );
        assert!( !is_wav_file( Path::new( "take1.wave" ) ) );
        assert!( !is_wav_file( Path::new( "wav" ) ) );
    }
}
