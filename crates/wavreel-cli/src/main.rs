//! Wavreel CLI - Terminal UI for a folder of WAV recordings

mod cli;
mod input;
mod logging;
mod settings;

use std::io;
use std::time::{ Duration, Instant };

use anyhow::{ Context, Result };
use clap::Parser;
use crossterm::{
    event::{ self, Event, KeyCode, KeyEventKind, KeyModifiers },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, List, ListItem, ListState, Paragraph, Wrap },
};

use cli::Args;
use input::{ InputBuffer, InputMode };
use settings::Settings;

use wavreel_core::{
    command,
    Command, CommandError, PlaybackState, Player, SessionStatus,
};


/// Label shown when the playhead is in a gap.
const UNKNOWN_FILE: &str = "Unknown";


struct App {
    player: Player,
    settings: Settings,
    should_quit: bool,

    // View state
    file_list_state: ListState,
    show_help: bool,
    help_scroll: u16,

    // Input state
    input_mode: InputMode,
    input_buffer: InputBuffer,

    // Status message (shown in status bar)
    status_message: Option<String>,
    status_clear_at: Option<Instant>,

    /// Last session status seen by `tick`, to report transitions once
    last_status: SessionStatus,
}


impl App {
    fn new( player: Player, settings: Settings ) -> Self {
        let last_status = player.session().status();
        let mut app = Self {
            player,
            settings,
            should_quit: false,
            file_list_state: ListState::default(),
            show_help: false,
            help_scroll: 0,
            input_mode: InputMode::Normal,
            input_buffer: InputBuffer::default(),
            status_message: None,
            status_clear_at: None,
            last_status,
        };

        if app.player.session().degraded_mode() {
            app.set_status( "No audio device: whole-file playback only, seeking disabled" );
        }
        app
    }


    /// Sets a status message that auto-clears after a delay.
    fn set_status( &mut self, msg: impl Into<String> ) {
        self.status_message = Some( msg.into() );
        self.status_clear_at = Some( Instant::now() + Duration::from_secs( 3 ) );
    }


    /// Clears expired messages and reports session transitions.
    fn tick( &mut self ) {
        if let Some( clear_at ) = self.status_clear_at {
            if Instant::now() >= clear_at {
                self.status_message = None;
                self.status_clear_at = None;
            }
        }

        let status = self.player.session().status();
        if status != self.last_status {
            match &status {
                SessionStatus::Completed => self.set_status( "Reached end of timeline" ),
                SessionStatus::Failed( msg ) => self.set_status( format!( "Playback unavailable: {}", msg ) ),
                _ => {}
            }
            self.last_status = status;
        }

        // Follow the playhead in the file list
        let session = self.player.session();
        let current = session.index().entry_at( session.current_offset() ).map( |( i, _ )| i );
        if current.is_some() {
            self.file_list_state.select( current );
        }
    }


    fn handle_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        match self.input_mode {
            InputMode::Normal => self.handle_normal_key( code, modifiers ),
            InputMode::Command => self.handle_command_key( code ),
        }
    }


    fn handle_normal_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        if self.show_help {
            match code {
                KeyCode::Esc | KeyCode::Char( '?' ) => {
                    self.show_help = false;
                    return;
                }
                KeyCode::Up | KeyCode::Char( 'k' ) => {
                    self.help_scroll = self.help_scroll.saturating_sub( 1 );
                    return;
                }
                KeyCode::Down | KeyCode::Char( 'j' ) => {
                    self.help_scroll = self.help_scroll.saturating_add( 1 );
                    return;
                }
                _ => {}
            }
        }

        match code {
            KeyCode::Char( 'c' ) if modifiers.contains( KeyModifiers::CONTROL ) => {
                self.should_quit = true;
            }
            KeyCode::Char( 'q' ) => self.should_quit = true,
            KeyCode::Char( '/' ) => {
                self.input_mode = InputMode::Command;
                self.input_buffer.clear();
            }
            KeyCode::Char( '?' ) => {
                self.show_help = true;
                self.help_scroll = 0;
            }
            KeyCode::Char( ' ' ) => self.player.session().toggle(),
            KeyCode::Char( 's' ) => self.player.session().stop(),
            KeyCode::Left => {
                let target = self.player.session().current_offset() - self.settings.seek_step();
                self.seek_to( target.max( 0.0 ) );
            }
            KeyCode::Right => {
                let target = self.player.session().current_offset() + self.settings.seek_step();
                self.seek_to( target );
            }
            KeyCode::Char( 'n' ) => self.jump_next(),
            KeyCode::Char( 'p' ) => self.jump_previous(),
            _ => {}
        }
    }


    fn handle_command_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Enter => {
                let input = self.input_buffer.content().to_string();
                self.execute_command( &input );
                self.input_mode = InputMode::Normal;
                self.input_buffer.clear();
            }
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input_buffer.clear();
            }
            KeyCode::Backspace => {
                if self.input_buffer.is_empty() {
                    self.input_mode = InputMode::Normal;
                } else {
                    self.input_buffer.backspace();
                }
            }
            KeyCode::Delete => self.input_buffer.delete(),
            KeyCode::Left => self.input_buffer.move_left(),
            KeyCode::Right => self.input_buffer.move_right(),
            KeyCode::Home => self.input_buffer.move_home(),
            KeyCode::End => self.input_buffer.move_end(),
            KeyCode::Char( c ) => self.input_buffer.insert( c ),
            _ => {}
        }
    }


    fn execute_command( &mut self, input: &str ) {
        match Command::parse( input ) {
            Ok( cmd ) => {
                if let Err( e ) = self.run_command( cmd ) {
                    self.set_status( format!( "Error: {}", e ) );
                }
            }
            Err( e ) => {
                self.set_status( format!( "{}", e ) );
            }
        }
    }


    fn run_command( &mut self, cmd: Command ) -> Result<()> {
        let session = self.player.session();

        match cmd {
            Command::Play { from: Some( offset ) } => {
                if session.is_playing() {
                    self.seek_to( offset );
                } else {
                    session.play( offset );
                }
            }
            Command::Play { from: None } => {
                if !session.is_playing() {
                    session.toggle();
                }
            }
            Command::Pause => session.pause(),
            Command::Stop => session.stop(),
            Command::Seek { position } => {
                if session.degraded_mode() {
                    return Err( CommandError::ExecutionFailed(
                        "seeking is unavailable in whole-file playback".into()
                    ).into() );
                }
                self.seek_to( position );
            }
            Command::Next => self.jump_next(),
            Command::Prev => self.jump_previous(),
            Command::Export { path } => {
                self.player.export( &path )
                    .map_err( |e| CommandError::ExecutionFailed(
                        format!( "export to {}: {}", path.display(), e )
                    ))?;
                self.set_status( format!( "Exported to {}", path.display() ) );
            }
            Command::Help => {
                self.show_help = true;
                self.help_scroll = 0;
            }
            Command::Quit => self.should_quit = true,
        }

        Ok(())
    }


    fn seek_to( &mut self, offset: f64 ) {
        let session = self.player.session();
        if session.degraded_mode() {
            self.set_status( "Seeking is unavailable in whole-file playback" );
            return;
        }
        session.seek( offset );
    }


    fn jump_next( &mut self ) {
        let session = self.player.session();
        match session.index().next_start( session.current_offset() ) {
            Some( start ) => self.seek_to( start ),
            None => self.set_status( "Already at the last file" ),
        }
    }


    fn jump_previous( &mut self ) {
        let session = self.player.session();
        match session.index().previous_start( session.current_offset() ) {
            Some( start ) => self.seek_to( start ),
            None => self.seek_to( 0.0 ),
        }
    }
}


/// Formats seconds as M:SS.
fn format_time( seconds: f64 ) -> String {
    let secs = seconds.max( 0.0 ) as u64;
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


fn main() -> Result<()> {
    let args = Args::parse();

    // Logging is optional; the TUI owns stderr once it starts
    if let Err( e ) = logging::init() {
        eprintln!( "wavreel: logging disabled: {:#}", e );
    }

    let settings = Settings::load();
    let config = settings.player_config( args.gap, args.whole_file );

    let player = Player::open( &args.dir, &config )
        .with_context( || format!( "Cannot open {}", args.dir.display() ) )?;

    if args.index {
        for entry in player.index().entries() {
            println!( "{:>10.3} {:>10.3}  {}", entry.start, entry.end, entry.file_name );
        }
        println!( "{:>10.3} total", player.timeline().duration() );
        return Ok(());
    }

    if let Some( path ) = &args.export {
        player.export( path )
            .with_context( || format!( "Failed to export to {}", path.display() ) )?;
        println!( "Wrote {} ({})", path.display(), format_time( player.timeline().duration() ) );
        return Ok(());
    }

    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;

    let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;
    let mut app = App::new( player, settings );

    let result = run( &mut terminal, &mut app );

    // Cleanup
    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;

    result
}


fn run<B: Backend>( terminal: &mut Terminal<B>, app: &mut App ) -> Result<()> {
    loop {
        app.tick();

        terminal.draw( |frame| draw_ui( frame, app ) )?;

        if event::poll( Duration::from_millis( 100 ) )? {
            if let Event::Key( key ) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key( key.code, key.modifiers );
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}


/// Draws the main UI.
fn draw_ui( frame: &mut Frame, app: &mut App ) {
    let area = frame.area();

    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 2 ),  // Header
            Constraint::Min( 0 ),     // File list or help
            Constraint::Length( 5 ),  // Now playing
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( area );

    let header = Paragraph::new( format!(
        "  WAVREEL - {} files, {} backend",
        app.player.files().len(),
        app.player.session().backend_name()
    ))
        .style( Style::default().fg( Color::Cyan ).bold() )
        .block( Block::default().borders( Borders::BOTTOM ) );
    frame.render_widget( header, chunks[0] );

    if app.show_help {
        draw_help( frame, app, chunks[1] );
    } else {
        draw_files( frame, app, chunks[1] );
    }

    draw_now_playing( frame, app, chunks[2] );
    draw_status_bar( frame, app, chunks[3] );
}


fn draw_files( frame: &mut Frame, app: &mut App, area: Rect ) {
    let session = app.player.session();
    let current = session.current_file();

    let items: Vec<ListItem> = session.index()
        .entries()
        .iter()
        .map( |entry| {
            let is_current = current.as_deref() == Some( entry.file_name.as_str() );
            let marker = if is_current { "▶ " } else { "  " };
            let style = if is_current {
                Style::default().fg( Color::Green ).bold()
            } else {
                Style::default()
            };
            ListItem::new( format!(
                "{}{:>7} - {:<7} {}",
                marker,
                format_time( entry.start ),
                format_time( entry.end ),
                entry.file_name
            )).style( style )
        })
        .collect();

    let list = List::new( items )
        .block( Block::default()
            .title( format!( " Files ({}) ", session.index().len() ) )
            .borders( Borders::ALL )
        )
        .highlight_style( Style::default().bg( Color::DarkGray ) );

    frame.render_stateful_widget( list, area, &mut app.file_list_state );
}


fn draw_help( frame: &mut Frame, app: &mut App, area: Rect ) {
    let help_text = command::help_text();
    let line_count = help_text.lines().count() as u16;
    let visible_height = area.height.saturating_sub( 2 );

    let max_scroll = line_count.saturating_sub( visible_height );
    if app.help_scroll > max_scroll {
        app.help_scroll = max_scroll;
    }

    let help = Paragraph::new( help_text )
        .block( Block::default()
            .title( " Help (↑↓ scroll, ? or Esc to close) " )
            .borders( Borders::ALL )
        )
        .wrap( Wrap { trim: false } )
        .scroll(( app.help_scroll, 0 ));

    frame.render_widget( help, area );
}


fn draw_now_playing( frame: &mut Frame, app: &App, area: Rect ) {
    let session = app.player.session();

    let state_str = match session.state() {
        PlaybackState::Playing => "▶",
        PlaybackState::Paused => "⏸",
        PlaybackState::Idle => "■",
    };

    let status_str = match session.status() {
        SessionStatus::Ready => "Ready".to_string(),
        SessionStatus::Playing => "Playing".to_string(),
        SessionStatus::Paused => "Paused".to_string(),
        SessionStatus::Stopped => "Stopped".to_string(),
        SessionStatus::Completed => "Finished".to_string(),
        SessionStatus::Failed( msg ) => format!( "Unavailable: {}", msg ),
    };

    let title = session.current_file().unwrap_or_else( || UNKNOWN_FILE.to_string() );

    let position = session.current_offset();
    let duration = session.duration();

    let progress_width = 30;
    let progress = if duration > 0.0 {
        ( position / duration ).clamp( 0.0, 1.0 )
    } else {
        0.0
    };
    let filled = ( progress * progress_width as f64 ).round() as usize;
    let bar = format!(
        "[{}{}]",
        "█".repeat( filled ),
        "░".repeat( progress_width - filled )
    );

    let mut lines = vec![
        Line::from( Span::styled( format!( " {} {} ", state_str, title ), Style::default().bold() ) ),
        Line::from( format!( " {} {} / {}  {} ", bar, format_time( position ), format_time( duration ), status_str ) ),
    ];

    if session.degraded_mode() {
        lines.push( Line::from( Span::styled(
            " Whole-file playback: always starts at 0:00, seeking disabled ",
            Style::default().fg( Color::Yellow ),
        )));
    }

    let now_playing = Paragraph::new( lines )
        .block( Block::default().title( " Now Playing " ).borders( Borders::ALL ) );

    frame.render_widget( now_playing, area );
}


fn draw_status_bar( frame: &mut Frame, app: &App, area: Rect ) {
    let ( text, style ) = match app.input_mode {
        InputMode::Command => {
            ( format!( "/{}", app.input_buffer.content() ), Style::default().fg( Color::Yellow ) )
        }
        InputMode::Normal => {
            if let Some( ref msg ) = app.status_message {
                ( msg.clone(), Style::default().fg( Color::Green ) )
            } else if app.show_help {
                ( " [↑↓]Scroll [?/Esc]Close ".to_string(), Style::default().fg( Color::DarkGray ) )
            } else {
                (
                    " [/]Cmd [Space]Play/Pause [s]Stop [←→]Seek [n/p]File [?]Help [q]Quit ".to_string(),
                    Style::default().fg( Color::DarkGray ),
                )
            }
        }
    };

    let status = Paragraph::new( text ).style( style );
    frame.render_widget( status, area );

    if app.input_mode == InputMode::Command {
        let cursor_x = area.x + 1 + app.input_buffer.cursor_char_pos() as u16;
        frame.set_cursor_position(( cursor_x, area.y ));
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( 0.0 ), "0:00" );
        assert_eq!( format_time( 12.9 ), "0:12" );
        assert_eq!( format_time( 95.0 ), "1:35" );
        assert_eq!( format_time( -1.0 ), "0:00" );
    }
}
