//! Position index
//!
//! Maps an offset in the merged timeline back to the recording it came
//! from. Silence gaps belong to no recording.


/// How far into a file `previous_start` must be before it rewinds to the
/// start of that file instead of jumping to the one before.
const PREVIOUS_RESTART_SECS: f64 = 1.0;


/// One source recording's interval in the merged timeline, `[start, end)`.
#[derive( Debug, Clone, PartialEq )]
pub struct PositionEntry {
    pub file_name: String,
    pub start: f64,
    pub end: f64,
}


impl PositionEntry {
    pub fn new( file_name: impl Into<String>, start: f64, end: f64 ) -> Self {
        Self {
            file_name: file_name.into(),
            start,
            end,
        }
    }


    /// Returns true if `offset` falls inside `[start, end)`.
    pub fn contains( &self, offset: f64 ) -> bool {
        self.start <= offset && offset < self.end
    }


    pub fn duration( &self ) -> f64 {
        self.end - self.start
    }
}


/// Ordered, non-overlapping list of entries. Immutable once built.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct PositionIndex {
    entries: Vec<PositionEntry>,
}


impl PositionIndex {
    /// Wraps entries that are already sorted by start and non-overlapping.
    pub fn new( entries: Vec<PositionEntry> ) -> Self {
        debug_assert!(
            entries.windows( 2 ).all( |w| w[ 0 ].end <= w[ 1 ].start ),
            "position entries must be sorted and non-overlapping"
        );
        Self { entries }
    }


    pub fn entries( &self ) -> &[PositionEntry] {
        &self.entries
    }


    pub fn len( &self ) -> usize {
        self.entries.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.entries.is_empty()
    }


    /// Finds the entry under `offset` along with its position in the index.
    pub fn entry_at( &self, offset: f64 ) -> Option<( usize, &PositionEntry )> {
        // Entries are sorted, so the candidate is the last one starting at or before offset
        let after = self.entries.partition_point( |e| e.start <= offset );
        let idx = after.checked_sub( 1 )?;
        let entry = &self.entries[ idx ];
        entry.contains( offset ).then_some(( idx, entry ))
    }


    /// Resolves an offset to a file name.
    ///
    /// Offsets in a gap, before zero, past the end or NaN resolve to `None`.
    pub fn resolve( &self, offset: f64 ) -> Option<&str> {
        self.entry_at( offset ).map( |( _, e )| e.file_name.as_str() )
    }


    /// Start of the first file beginning strictly after `offset`.
    pub fn next_start( &self, offset: f64 ) -> Option<f64> {
        self.entries
            .iter()
            .find( |e| e.start > offset )
            .map( |e| e.start )
    }


    /// Start of the file to rewind to from `offset`.
    ///
    /// Goes back to the beginning of the current file, or of the previous
    /// one when `offset` is within a second of the current file's start.
    pub fn previous_start( &self, offset: f64 ) -> Option<f64> {
        let before = self.entries.partition_point( |e| e.start < offset );
        let idx = before.checked_sub( 1 )?;

        if offset - self.entries[ idx ].start > PREVIOUS_RESTART_SECS || idx == 0 {
            Some( self.entries[ idx ].start )
        } else {
            Some( self.entries[ idx - 1 ].start )
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    /// Three files of 2.0, 3.5 and 1.0 seconds with 3 second gaps.
    fn sample_index() -> PositionIndex {
        PositionIndex::new( vec![
            PositionEntry::new( "a.wav", 0.0, 2.0 ),
            PositionEntry::new( "b.wav", 5.0, 8.5 ),
            PositionEntry::new( "c.wav", 11.5, 12.5 ),
        ])
    }


    #[test]
    fn test_resolve_inside_entries() {
        let index = sample_index();
        assert_eq!( index.resolve( 1.0 ), Some( "a.wav" ) );
        assert_eq!( index.resolve( 6.5 ), Some( "b.wav" ) );
        assert_eq!( index.resolve( 12.0 ), Some( "c.wav" ) );
    }


    #[test]
    fn test_resolve_boundaries_are_half_open() {
        let index = sample_index();
        assert_eq!( index.resolve( 0.0 ), Some( "a.wav" ) );
        assert_eq!( index.resolve( 2.0 ), None );
        assert_eq!( index.resolve( 5.0 ), Some( "b.wav" ) );
        assert_eq!( index.resolve( 12.5 ), None );
    }


    #[test]
    fn test_resolve_unknown_offsets() {
        let index = sample_index();
        assert_eq!( index.resolve( 3.0 ), None );
        assert_eq!( index.resolve( 10.0 ), None );
        assert_eq!( index.resolve( -0.5 ), None );
        assert_eq!( index.resolve( 100.0 ), None );
        assert_eq!( index.resolve( f64::NAN ), None );
    }


    #[test]
    fn test_resolve_empty_index() {
        assert_eq!( PositionIndex::default().resolve( 0.0 ), None );
    }


    #[test]
    fn test_entry_at_reports_position() {
        let index = sample_index();
        let ( idx, entry ) = index.entry_at( 7.0 ).unwrap();
        assert_eq!( idx, 1 );
        assert_eq!( entry.file_name, "b.wav" );
        assert_eq!( entry.duration(), 3.5 );
    }


    #[test]
    fn test_next_start() {
        let index = sample_index();
        assert_eq!( index.next_start( 0.0 ), Some( 5.0 ) );
        assert_eq!( index.next_start( 3.0 ), Some( 5.0 ) );
        assert_eq!( index.next_start( 5.0 ), Some( 11.5 ) );
        assert_eq!( index.next_start( 12.0 ), None );
    }


    #[test]
    fn test_previous_start() {
        let index = sample_index();
        // Well into b.wav rewinds to its start
        assert_eq!( index.previous_start( 7.0 ), Some( 5.0 ) );
        // Just after b.wav starts goes back to a.wav
        assert_eq!( index.previous_start( 5.5 ), Some( 0.0 ) );
        // In the gap after b.wav
        assert_eq!( index.previous_start( 10.0 ), Some( 5.0 ) );
        assert_eq!( index.previous_start( 0.5 ), Some( 0.0 ) );
        assert_eq!( index.previous_start( 0.0 ), None );
    }
}
