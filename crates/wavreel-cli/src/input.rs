//! Input mode handling for the TUI.
//!
//! Tracks whether keys are shortcuts or text for a slash command, and
//! holds the command line being edited.


/// Current input mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    /// Keyboard shortcuts active.
    #[default]
    Normal,

    /// Typing a slash command.
    Command,
}


/// Editable command line with a byte-offset cursor.
#[derive( Debug, Default )]
pub struct InputBuffer {
    content: String,
    cursor: usize,
}


impl InputBuffer {
    /// Inserts a character at the cursor position.
    pub fn insert( &mut self, c: char ) {
        self.content.insert( self.cursor, c );
        self.cursor += c.len_utf8();
    }


    /// Deletes the character before the cursor.
    pub fn backspace( &mut self ) {
        if self.cursor > 0 {
            let prev = self.prev_boundary();
            self.content.remove( prev );
            self.cursor = prev;
        }
    }


    /// Deletes the character at the cursor position.
    pub fn delete( &mut self ) {
        if self.cursor < self.content.len() {
            self.content.remove( self.cursor );
        }
    }


    pub fn clear( &mut self ) {
        self.content.clear();
        self.cursor = 0;
    }


    pub fn content( &self ) -> &str {
        &self.content
    }


    /// Cursor position in characters, for display.
    pub fn cursor_char_pos( &self ) -> usize {
        self.content[ ..self.cursor ].chars().count()
    }


    fn prev_boundary( &self ) -> usize {
        self.content[ ..self.cursor ]
            .char_indices()
            .last()
            .map( |( i, _ )| i )
            .unwrap_or( 0 )
    }


    pub fn move_left( &mut self ) {
        self.cursor = self.prev_boundary();
    }


    pub fn move_right( &mut self ) {
        if let Some( c ) = self.content[ self.cursor.. ].chars().next() {
            self.cursor += c.len_utf8();
        }
    }


    pub fn move_home( &mut self ) {
        self.cursor = 0;
    }


    pub fn move_end( &mut self ) {
        self.cursor = self.content.len();
    }


    pub fn is_empty( &self ) -> bool {
        self.content.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn typed( s: &str ) -> InputBuffer {
        let mut buf = InputBuffer::default();
        for c in s.chars() {
            buf.insert( c );
        }
        buf
    }


    #[test]
    fn test_insert_in_middle() {
        let mut buf = typed( "sek 5" );
        buf.move_home();
        buf.move_right();
        buf.move_right();
        buf.insert( 'e' );
        assert_eq!( buf.content(), "seek 5" );
        assert_eq!( buf.cursor_char_pos(), 3 );
    }


    #[test]
    fn test_multibyte_editing() {
        let mut buf = typed( "é1" );
        buf.move_left();
        buf.backspace();
        assert_eq!( buf.content(), "1" );
        assert_eq!( buf.cursor_char_pos(), 0 );

        buf.move_end();
        buf.move_right();
        buf.delete();
        assert_eq!( buf.content(), "1" );
    }
}
