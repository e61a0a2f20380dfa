//! Playback session
//!
//! Owns the merged timeline and its position index, drives a playback
//! backend from any offset, and keeps track of where the playhead is.
//!
//! Two threads touch the session: the control thread calling `play`,
//! `pause`, `stop` and `seek`, and a progress poller that runs while audio
//! is playing. The poller estimates the playhead from elapsed wall time,
//! resolves the file under it, and notices when the backend finishes. All
//! shared fields sit behind one mutex.

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard };
use std::thread;
use std::time::{ Duration, Instant };

use crate::backend::{ PlaybackBackend, PlaybackHandle };
use crate::index::PositionIndex;
use crate::timeline::MergedTimeline;


/// Default delay between progress updates.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis( 100 );


/// Playback state machine.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}


/// What the UI should show about the session.
#[derive( Debug, Clone, PartialEq )]
pub enum SessionStatus {
    /// Not playing; the playhead was just placed or nothing happened yet.
    Ready,
    Playing,
    Paused,
    /// Stopped by the user and rewound.
    Stopped,
    /// Reached the end of the timeline on its own.
    Completed,
    /// The backend could not start; the session itself is still usable.
    Failed( String ),
}


/// Fields shared with the poller.
struct Inner {
    state: PlaybackState,
    status: SessionStatus,
    current_offset: f64,
    current_file: Option<String>,
    anchor: Option<Instant>,
    anchor_offset: f64,
    handle: Option<Box<dyn PlaybackHandle>>,
}


struct Shared {
    inner: Mutex<Inner>,
    /// Set while a poller thread is alive; at most one per session.
    poller_running: AtomicBool,
    #[cfg( test )]
    poller_spawns: std::sync::atomic::AtomicUsize,
}


/// Playback over a merged timeline.
pub struct PlaybackSession {
    timeline: Arc<MergedTimeline>,
    index: Arc<PositionIndex>,
    backend: Box<dyn PlaybackBackend>,
    shared: Arc<Shared>,
    poll_interval: Duration,
    poller: Mutex<Option<thread::JoinHandle<()>>>,
}


impl PlaybackSession {
    /// Creates an idle session with the playhead at zero.
    pub fn new(
        timeline: MergedTimeline,
        index: PositionIndex,
        backend: Box<dyn PlaybackBackend>,
        poll_interval: Duration,
    ) -> Self {
        let current_file = index.resolve( 0.0 ).map( str::to_owned );
        tracing::info!(
            "Session ready: {:.2}s, {} files, {} backend",
            timeline.duration(),
            index.len(),
            backend.name()
        );

        Self {
            timeline: Arc::new( timeline ),
            index: Arc::new( index ),
            backend,
            shared: Arc::new( Shared {
                inner: Mutex::new( Inner {
                    state: PlaybackState::Idle,
                    status: SessionStatus::Ready,
                    current_offset: 0.0,
                    current_file,
                    anchor: None,
                    anchor_offset: 0.0,
                    handle: None,
                }),
                poller_running: AtomicBool::new( false ),
                #[cfg( test )]
                poller_spawns: std::sync::atomic::AtomicUsize::new( 0 ),
            }),
            poll_interval: poll_interval.max( Duration::from_millis( 1 ) ),
            poller: Mutex::new( None ),
        }
    }


    fn lock( &self ) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap()
    }


    /// Clamps a requested offset into `[0, duration)`.
    fn clamp_offset( &self, offset: f64 ) -> f64 {
        let duration = self.timeline.duration();
        let last = ( duration - 1.0 / self.timeline.sample_rate() as f64 ).max( 0.0 );

        let clamped = if !( offset >= 0.0 ) {
            0.0
        } else if offset >= duration {
            last
        } else {
            offset
        };

        if clamped != offset {
            tracing::debug!( "Offset {} outside timeline, clamped to {:.3}", offset, clamped );
        }
        clamped
    }


    /// Starts playback at `from_offset` seconds.
    ///
    /// Does nothing if already playing. Without seek support playback always
    /// starts at zero. A backend failure leaves the session not playing with
    /// a `Failed` status.
    pub fn play( &self, from_offset: f64 ) {
        let mut inner = self.lock();
        if inner.state == PlaybackState::Playing {
            return;
        }

        let offset = if self.backend.supports_seek() {
            self.clamp_offset( from_offset )
        } else {
            if from_offset != 0.0 {
                tracing::debug!( "Backend cannot seek, starting at 0 instead of {}", from_offset );
            }
            0.0
        };

        let stale = inner.handle.take();
        let frame = self.timeline.frame_at( offset );

        match self.backend.start( &self.timeline, frame ) {
            Ok( handle ) => {
                inner.handle = Some( handle );
                inner.anchor = Some( Instant::now() );
                inner.anchor_offset = offset;
                inner.current_offset = offset;
                inner.current_file = self.index.resolve( offset ).map( str::to_owned );
                inner.state = PlaybackState::Playing;
                inner.status = SessionStatus::Playing;
                tracing::info!( "Playing from {:.2}s", offset );

                // Spawned under the lock so a poller that is just exiting
                // cannot miss this transition
                self.ensure_poller();
            }
            Err( e ) => {
                tracing::warn!( "Playback failed to start: {}", e );
                inner.status = SessionStatus::Failed( e.to_string() );
            }
        }

        drop( inner );
        drop( stale );
    }


    /// Plays from the current playhead.
    pub fn resume( &self ) {
        let offset = self.current_offset();
        self.play( offset );
    }


    /// Pauses if playing, otherwise resumes.
    ///
    /// After playback completed on its own, resumes from the beginning.
    pub fn toggle( &self ) {
        let ( state, status, offset ) = {
            let inner = self.lock();
            ( inner.state, inner.status.clone(), inner.current_offset )
        };

        match ( state, status ) {
            ( PlaybackState::Playing, _ ) => self.pause(),
            ( _, SessionStatus::Completed ) => self.play( 0.0 ),
            _ => self.play( offset ),
        }
    }


    /// Stops the audio and freezes the playhead. No-op unless playing.
    pub fn pause( &self ) {
        let mut inner = self.lock();
        if inner.state != PlaybackState::Playing {
            return;
        }

        if let Some( anchor ) = inner.anchor.take() {
            let offset = ( inner.anchor_offset + anchor.elapsed().as_secs_f64() )
                .min( self.timeline.duration() );
            inner.current_offset = offset;
            inner.current_file = self.index.resolve( offset ).map( str::to_owned );
        }

        let mut handle = inner.handle.take();
        if let Some( h ) = handle.as_mut() {
            h.stop();
        }

        inner.state = PlaybackState::Paused;
        inner.status = SessionStatus::Paused;
        tracing::info!( "Paused at {:.2}s", inner.current_offset );

        drop( inner );
        drop( handle );
    }


    /// Pauses and rewinds to zero.
    pub fn stop( &self ) {
        self.pause();

        let mut inner = self.lock();
        inner.state = PlaybackState::Idle;
        inner.status = SessionStatus::Stopped;
        inner.current_offset = 0.0;
        inner.current_file = self.index.resolve( 0.0 ).map( str::to_owned );
        tracing::info!( "Stopped" );
    }


    /// Moves the playhead.
    ///
    /// While playing this restarts playback at the new offset; otherwise it
    /// only moves the playhead. Ignored when the backend cannot seek.
    pub fn seek( &self, offset: f64 ) {
        if !self.backend.supports_seek() {
            tracing::debug!( "Seek to {} ignored, backend cannot seek", offset );
            return;
        }

        if self.is_playing() {
            self.pause();
            self.play( offset );
            return;
        }

        let offset = self.clamp_offset( offset );
        let mut inner = self.lock();
        inner.current_offset = offset;
        inner.current_file = self.index.resolve( offset ).map( str::to_owned );
        inner.status = SessionStatus::Ready;
    }


    /// Spawns the progress poller unless one is already running.
    ///
    /// Callers hold the state lock.
    fn ensure_poller( &self ) {
        if self.shared.poller_running
            .compare_exchange( false, true, Ordering::AcqRel, Ordering::Acquire )
            .is_err()
        {
            tracing::debug!( "Progress poller already running" );
            return;
        }

        let shared = Arc::clone( &self.shared );
        let index = Arc::clone( &self.index );
        let duration = self.timeline.duration();
        let interval = self.poll_interval;

        let spawned = thread::Builder::new()
            .name( "wavreel-poller".into() )
            .spawn( move || poll_loop( shared, index, duration, interval ) );

        match spawned {
            Ok( handle ) => {
                #[cfg( test )]
                self.shared.poller_spawns.fetch_add( 1, Ordering::SeqCst );
                // A previous poller has already cleared the flag and is returning
                *self.poller.lock().unwrap() = Some( handle );
            }
            Err( e ) => {
                self.shared.poller_running.store( false, Ordering::Release );
                tracing::warn!( "Failed to start progress poller: {}", e );
            }
        }
    }


    /// Current playhead in seconds.
    pub fn current_offset( &self ) -> f64 {
        self.lock().current_offset
    }


    /// File under the playhead, or None in a gap.
    pub fn current_file( &self ) -> Option<String> {
        self.lock().current_file.clone()
    }


    pub fn is_playing( &self ) -> bool {
        self.lock().state == PlaybackState::Playing
    }


    /// True when the backend cannot seek: playback always starts at zero
    /// and `seek` does nothing.
    pub fn degraded_mode( &self ) -> bool {
        !self.backend.supports_seek()
    }


    pub fn state( &self ) -> PlaybackState {
        self.lock().state
    }


    pub fn status( &self ) -> SessionStatus {
        self.lock().status.clone()
    }


    /// Total timeline duration in seconds.
    pub fn duration( &self ) -> f64 {
        self.timeline.duration()
    }


    pub fn index( &self ) -> &PositionIndex {
        &self.index
    }


    pub fn timeline( &self ) -> &MergedTimeline {
        &self.timeline
    }


    pub fn backend_name( &self ) -> &'static str {
        self.backend.name()
    }
}


impl Drop for PlaybackSession {
    fn drop( &mut self ) {
        self.stop();
        // Exits on its next tick now that nothing is playing
        if let Some( poller ) = self.poller.lock().unwrap().take() {
            let _ = poller.join();
        }
    }
}


/// Progress poller body. Runs until the session stops playing.
fn poll_loop( shared: Arc<Shared>, index: Arc<PositionIndex>, duration: f64, interval: Duration ) {
    tracing::debug!( "Progress poller started" );

    loop {
        let finished_handle = {
            let mut inner = shared.inner.lock().unwrap();

            if inner.state != PlaybackState::Playing {
                shared.poller_running.store( false, Ordering::Release );
                break;
            }

            let finished = inner.handle
                .as_mut()
                .map_or( true, |h| !h.is_playing() );

            if finished {
                inner.state = PlaybackState::Idle;
                inner.status = SessionStatus::Completed;
                inner.anchor = None;
                inner.current_offset = duration;
                inner.current_file = index.resolve( duration ).map( str::to_owned );
                shared.poller_running.store( false, Ordering::Release );
                tracing::info!( "Playback completed at {:.2}s", duration );
                Some( inner.handle.take() )
            } else {
                let elapsed = inner.anchor.map_or( 0.0, |a| a.elapsed().as_secs_f64() );
                let offset = ( inner.anchor_offset + elapsed ).min( duration );
                inner.current_offset = offset;
                inner.current_file = index.resolve( offset ).map( str::to_owned );
                None
            }
        };

        if let Some( handle ) = finished_handle {
            drop( handle );
            break;
        }

        thread::sleep( interval );
    }

    tracing::debug!( "Progress poller exiting" );
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::backend::PlaybackError;
    use crate::decoder::{ AudioSegment, SampleEncoding };
    use crate::timeline::concatenate_segments;


    const RATE: u32 = 1000;
    const INTERVAL: Duration = Duration::from_millis( 10 );


    #[derive( Default )]
    struct Calls {
        starts: Mutex<Vec<usize>>,
        stops: Mutex<usize>,
        finished: AtomicBool,
    }


    struct FakeBackend {
        seekable: bool,
        fail: bool,
        calls: Arc<Calls>,
    }


    struct FakeHandle {
        calls: Arc<Calls>,
        stopped: bool,
    }


    impl PlaybackHandle for FakeHandle {
        fn is_playing( &mut self ) -> bool {
            !self.stopped && !self.calls.finished.load( Ordering::SeqCst )
        }


        fn stop( &mut self ) {
            self.stopped = true;
            *self.calls.stops.lock().unwrap() += 1;
        }
    }


    impl PlaybackBackend for FakeBackend {
        fn name( &self ) -> &'static str {
            "fake"
        }


        fn supports_seek( &self ) -> bool {
            self.seekable
        }


        fn start(
            &self,
            _timeline: &Arc<MergedTimeline>,
            from_frame: usize,
        ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
            if self.fail {
                return Err( PlaybackError::Unavailable( "no device".into() ) );
            }
            let frame = if self.seekable { from_frame } else { 0 };
            self.calls.starts.lock().unwrap().push( frame );
            self.calls.finished.store( false, Ordering::SeqCst );
            Ok( Box::new( FakeHandle {
                calls: Arc::clone( &self.calls ),
                stopped: false,
            }))
        }
    }


    fn segment( seconds: f64 ) -> AudioSegment {
        let frames = ( seconds * RATE as f64 ) as usize;
        AudioSegment::new( vec![ 0.1; frames ], RATE, 1, SampleEncoding::Int( 16 ) )
    }


    /// a.wav [0, 2), b.wav [5, 8.5), c.wav [11.5, 12.5)
    fn session_with( seekable: bool, fail: bool ) -> ( PlaybackSession, Arc<Calls> ) {
        let ( timeline, index ) = concatenate_segments(
            vec![
                ( "a.wav".into(), segment( 2.0 ) ),
                ( "b.wav".into(), segment( 3.5 ) ),
                ( "c.wav".into(), segment( 1.0 ) ),
            ],
            3.0,
        ).unwrap();

        let calls = Arc::new( Calls::default() );
        let backend = FakeBackend {
            seekable,
            fail,
            calls: Arc::clone( &calls ),
        };
        ( PlaybackSession::new( timeline, index, Box::new( backend ), INTERVAL ), calls )
    }


    fn session() -> ( PlaybackSession, Arc<Calls> ) {
        session_with( true, false )
    }


    fn wait_until( mut cond: impl FnMut() -> bool ) -> bool {
        let deadline = Instant::now() + Duration::from_secs( 2 );
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep( Duration::from_millis( 5 ) );
        }
        cond()
    }


    #[test]
    fn test_initial_state() {
        let ( session, _ ) = session();
        assert_eq!( session.state(), PlaybackState::Idle );
        assert_eq!( session.status(), SessionStatus::Ready );
        assert_eq!( session.current_offset(), 0.0 );
        assert_eq!( session.current_file().as_deref(), Some( "a.wav" ) );
        assert!( !session.is_playing() );
        assert!( !session.degraded_mode() );
        assert!( ( session.duration() - 12.5 ).abs() < 1e-9 );
    }


    #[test]
    fn test_play_starts_at_offset_frame() {
        let ( session, calls ) = session();
        session.play( 5.0 );

        assert!( session.is_playing() );
        assert_eq!( session.status(), SessionStatus::Playing );
        assert_eq!( *calls.starts.lock().unwrap(), vec![ 5000 ] );
        assert!( ( session.current_offset() - 5.0 ).abs() < 0.05 );
        assert_eq!( session.current_file().as_deref(), Some( "b.wav" ) );
    }


    #[test]
    fn test_play_clamps_offset() {
        let ( session, calls ) = session();
        session.play( -4.0 );
        session.pause();
        session.play( 99.0 );

        let starts = calls.starts.lock().unwrap().clone();
        assert_eq!( starts[ 0 ], 0 );
        assert!( starts[ 1 ] < 12_500 );
    }


    #[test]
    fn test_play_while_playing_is_noop() {
        let ( session, calls ) = session();
        session.play( 1.0 );
        session.play( 6.0 );

        assert_eq!( calls.starts.lock().unwrap().len(), 1 );
        assert!( session.current_offset() < 2.0 );
    }


    #[test]
    fn test_pause_twice_same_as_once() {
        let ( session, calls ) = session();
        session.play( 6.0 );
        session.pause();

        let offset = session.current_offset();
        let file = session.current_file();
        session.pause();

        assert_eq!( session.state(), PlaybackState::Paused );
        assert_eq!( session.status(), SessionStatus::Paused );
        assert_eq!( session.current_offset(), offset );
        assert_eq!( session.current_file(), file );
        assert_eq!( *calls.stops.lock().unwrap(), 1 );
        assert!( offset >= 6.0 );
    }


    #[test]
    fn test_pause_when_idle_is_noop() {
        let ( session, calls ) = session();
        session.pause();
        assert_eq!( session.state(), PlaybackState::Idle );
        assert_eq!( *calls.stops.lock().unwrap(), 0 );
    }


    #[test]
    fn test_poller_advances_playhead() {
        let ( session, _ ) = session();
        session.play( 5.0 );

        assert!( wait_until( || session.current_offset() > 5.1 ) );
        let offset = session.current_offset();
        assert!( offset < 7.0, "offset ran ahead: {}", offset );
        assert_eq!( session.current_file().as_deref(), Some( "b.wav" ) );
    }


    #[test]
    fn test_poller_resolves_gap_to_unknown() {
        let ( session, _ ) = session();
        session.play( 1.95 );

        assert!( wait_until( || session.current_offset() > 2.05 ) );
        assert_eq!( session.current_file(), None );
    }


    #[test]
    fn test_natural_completion() {
        let ( session, calls ) = session();
        session.play( 11.0 );
        calls.finished.store( true, Ordering::SeqCst );

        assert!( wait_until( || !session.is_playing() ) );
        assert_eq!( session.state(), PlaybackState::Idle );
        assert_eq!( session.status(), SessionStatus::Completed );
        assert_eq!( session.current_offset(), session.duration() );
        assert_eq!( session.current_file(), None );
        assert!( wait_until( || !session.shared.poller_running.load( Ordering::SeqCst ) ) );
    }


    #[test]
    fn test_toggle_after_completion_restarts() {
        let ( session, calls ) = session();
        session.play( 11.0 );
        calls.finished.store( true, Ordering::SeqCst );
        assert!( wait_until( || session.status() == SessionStatus::Completed ) );

        session.toggle();
        assert!( session.is_playing() );
        assert_eq!( calls.starts.lock().unwrap().last(), Some( &0 ) );

        session.toggle();
        assert_eq!( session.state(), PlaybackState::Paused );
    }


    #[test]
    fn test_stop_rewinds() {
        let ( session, calls ) = session();
        session.play( 6.0 );
        session.stop();

        assert_eq!( session.state(), PlaybackState::Idle );
        assert_eq!( session.status(), SessionStatus::Stopped );
        assert_eq!( session.current_offset(), 0.0 );
        assert_eq!( session.current_file().as_deref(), Some( "a.wav" ) );
        assert_eq!( *calls.stops.lock().unwrap(), 1 );
    }


    #[test]
    fn test_resume_after_pause_continues() {
        let ( session, calls ) = session();
        session.play( 6.0 );
        thread::sleep( Duration::from_millis( 30 ) );
        session.pause();
        let paused_at = session.current_offset();

        session.resume();
        let starts = calls.starts.lock().unwrap().clone();
        assert_eq!( starts.len(), 2 );
        assert_eq!( starts[ 1 ], ( paused_at * RATE as f64 ) as usize );
    }


    #[test]
    fn test_seek_while_playing_restarts() {
        let ( session, calls ) = session();
        session.play( 1.0 );
        session.seek( 6.5 );

        assert!( session.is_playing() );
        assert_eq!( *calls.starts.lock().unwrap(), vec![ 1000, 6500 ] );
        assert!( ( session.current_offset() - 6.5 ).abs() <= INTERVAL.as_secs_f64() * 2.0 );
        assert_eq!( session.current_file().as_deref(), Some( "b.wav" ) );
    }


    #[test]
    fn test_seek_while_paused_moves_playhead_only() {
        let ( session, calls ) = session();
        session.play( 1.0 );
        session.pause();
        session.seek( 3.0 );

        assert!( !session.is_playing() );
        assert_eq!( session.state(), PlaybackState::Paused );
        assert_eq!( session.status(), SessionStatus::Ready );
        assert_eq!( session.current_offset(), 3.0 );
        assert_eq!( session.current_file(), None );
        assert_eq!( calls.starts.lock().unwrap().len(), 1 );

        session.seek( 12.0 );
        assert_eq!( session.current_file().as_deref(), Some( "c.wav" ) );
    }


    #[test]
    fn test_degraded_mode_plays_from_start() {
        let ( session, calls ) = session_with( false, false );
        assert!( session.degraded_mode() );

        session.play( 5.0 );
        assert!( session.is_playing() );
        assert_eq!( *calls.starts.lock().unwrap(), vec![ 0 ] );
        assert!( session.current_offset() < 1.0 );

        let before = session.current_offset();
        session.seek( 8.0 );
        assert_eq!( calls.starts.lock().unwrap().len(), 1 );
        assert!( session.current_offset() < 1.0 );
        assert!( session.current_offset() >= before );
    }


    #[test]
    fn test_degraded_seek_when_idle_is_ignored() {
        let ( session, _ ) = session_with( false, false );
        session.seek( 8.0 );
        assert_eq!( session.current_offset(), 0.0 );
        assert_eq!( session.status(), SessionStatus::Ready );
    }


    #[test]
    fn test_backend_failure_sets_status() {
        let ( session, _ ) = session_with( true, true );
        session.play( 2.0 );

        assert!( !session.is_playing() );
        assert!( matches!( session.status(), SessionStatus::Failed( _ ) ) );
        assert!( !session.shared.poller_running.load( Ordering::SeqCst ) );
    }


    #[test]
    fn test_single_poller_across_restarts() {
        let ( session, calls ) = session();
        session.play( 5.0 );
        assert!( wait_until( || session.current_offset() > 5.0 ) );

        // Faster than one poll interval, so the running poller is reused
        for _ in 0..20 {
            session.pause();
            session.play( 5.0 );
        }

        let spawns = session.shared.poller_spawns.load( Ordering::SeqCst );
        assert!( ( 1..=2 ).contains( &spawns ), "spawned {} pollers", spawns );
        assert_eq!( calls.starts.lock().unwrap().len(), 21 );
        assert!( session.shared.poller_running.load( Ordering::SeqCst ) );
        assert!( wait_until( || session.current_offset() > 5.05 ) );
    }


    #[test]
    fn test_poller_respawns_after_exit() {
        let ( session, _ ) = session();
        session.play( 1.0 );
        session.pause();
        assert!( wait_until( || !session.shared.poller_running.load( Ordering::SeqCst ) ) );

        session.play( 1.0 );
        assert_eq!( session.shared.poller_spawns.load( Ordering::SeqCst ), 2 );
        assert!( wait_until( || session.current_offset() > 1.05 ) );
    }


    #[test]
    fn test_drop_stops_playback() {
        let ( session, calls ) = session();
        session.play( 1.0 );
        drop( session );
        assert_eq!( *calls.stops.lock().unwrap(), 1 );
    }
}
