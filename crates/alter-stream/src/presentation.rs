//! Avatar presentation
//!
//! Chooses which surface is visible: the static avatar image, the idle loop
//! (only when no image resolves), or the live talking video.
//!
//! [`PresentationMachine`] is a pure Mealy machine; the visible surface is
//! its state and nothing else. [`PresentationController`] feeds it events,
//! publishes every surface on a `watch` channel, and drives the
//! [`VideoSurface`].
//!
//! A stop that arrives while `play()` is still pending is held until the
//! play resolves. Each play carries a sequence number; only the latest one
//! can resolve a deferred stop.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Visible surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    StaticImage,
    IdleLoop,
    LiveVideo,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticImage => "static-image",
            Self::IdleLoop => "idle-loop",
            Self::LiveVideo => "live-video",
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationEvent {
    /// Playback started; the machine numbers the `play()` it issues
    PlaybackActive,
    PlaybackInactive,
    /// A `play()` settled, successfully or not
    PlayResolved(u64),
    Teardown,
    /// Whether an avatar image is resolvable
    ImageChanged(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationMachine {
    state: Surface,
    /// Sequence number of the latest play
    play_seq: u64,
    /// Latest play, while it has not settled
    pending_play: Option<u64>,
    stop_deferred: bool,
    has_image: bool,
}

impl PresentationMachine {
    pub fn new(has_image: bool) -> Self {
        let mut machine = Self {
            state: Surface::StaticImage,
            play_seq: 0,
            pending_play: None,
            stop_deferred: false,
            has_image,
        };
        machine.state = machine.rest();
        machine
    }

    pub fn surface(&self) -> Surface {
        self.state
    }

    pub fn play_pending(&self) -> bool {
        self.pending_play.is_some()
    }

    /// Sequence number of the play still pending, if any
    pub fn pending_play(&self) -> Option<u64> {
        self.pending_play
    }

    fn rest(&self) -> Surface {
        if self.has_image {
            Surface::StaticImage
        } else {
            Surface::IdleLoop
        }
    }

    pub fn handle(&mut self, event: PresentationEvent) -> Surface {
        match event {
            PresentationEvent::PlaybackActive => {
                self.play_seq += 1;
                self.state = Surface::LiveVideo;
                self.pending_play = Some(self.play_seq);
                self.stop_deferred = false;
            }
            PresentationEvent::PlaybackInactive => {
                if self.pending_play.is_some() {
                    self.stop_deferred = true;
                } else {
                    self.state = self.rest();
                }
            }
            PresentationEvent::PlayResolved(seq) => {
                if self.pending_play != Some(seq) {
                    debug!(seq, latest = self.play_seq, "Stale play resolved");
                    return self.state;
                }
                self.pending_play = None;
                if self.stop_deferred {
                    self.stop_deferred = false;
                    self.state = self.rest();
                }
            }
            PresentationEvent::Teardown => {
                self.play_seq += 1;
                self.pending_play = None;
                self.stop_deferred = false;
                self.state = self.rest();
            }
            PresentationEvent::ImageChanged(has_image) => {
                self.has_image = has_image;
                if self.state != Surface::LiveVideo {
                    self.state = self.rest();
                }
            }
        }
        self.state
    }
}

/// Where surfaces are actually shown
#[async_trait]
pub trait VideoSurface: Send + Sync {
    /// Make `surface` visible; `image_url` is the resolved avatar image
    fn show(&self, surface: Surface, image_url: &str);

    /// Start live playback; returns when the play settles
    async fn play_live(&self);
}

/// Surface that only logs (headless use)
#[derive(Debug, Default)]
pub struct LogSurface;

#[async_trait]
impl VideoSurface for LogSurface {
    fn show(&self, surface: Surface, image_url: &str) {
        debug!(surface = %surface, image = image_url, "Surface shown");
    }

    async fn play_live(&self) {}
}

struct Inner {
    machine: PresentationMachine,
    image_url: String,
}

/// Drives the machine and its surface
pub struct PresentationController {
    inner: Mutex<Inner>,
    surface: Arc<dyn VideoSurface>,
    tx: watch::Sender<Surface>,
}

impl PresentationController {
    pub fn new(surface: Arc<dyn VideoSurface>, image_url: impl Into<String>) -> Arc<Self> {
        let image_url = image_url.into();
        let machine = PresentationMachine::new(!image_url.trim().is_empty());
        let initial = machine.surface();
        let (tx, _) = watch::channel(initial);
        surface.show(initial, &image_url);

        Arc::new(Self {
            inner: Mutex::new(Inner { machine, image_url }),
            surface,
            tx,
        })
    }

    pub fn current(&self) -> Surface {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Surface> {
        self.tx.subscribe()
    }

    /// Apply one event; returns the surface now visible
    pub fn apply(&self, event: PresentationEvent) -> Surface {
        self.transition(event).0
    }

    /// Apply one event; also returns the play left pending
    fn transition(&self, event: PresentationEvent) -> (Surface, Option<u64>) {
        let (before, after, pending, image_url) = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let before = inner.machine.surface();
            let after = inner.machine.handle(event);
            let pending = inner.machine.pending_play();
            (before, after, pending, inner.image_url.clone())
        };

        if before != after {
            debug!(from = %before, to = %after, ?event, "Presentation changed");
            self.surface.show(after, &image_url);
        }
        self.tx.send_replace(after);
        (after, pending)
    }

    /// Playback edge from the sampler
    pub fn playback_changed(self: &Arc<Self>, active: bool) {
        if !active {
            self.apply(PresentationEvent::PlaybackInactive);
            return;
        }

        let (_, pending) = self.transition(PresentationEvent::PlaybackActive);
        let Some(seq) = pending else {
            return;
        };
        // play() settles on its own; sampling keeps going meanwhile
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.surface.play_live().await;
            this.apply(PresentationEvent::PlayResolved(seq));
        });
    }

    pub fn teardown(&self) -> Surface {
        self.apply(PresentationEvent::Teardown)
    }

    /// Swap the avatar image shown while not live
    pub fn set_image(&self, image_url: impl Into<String>) {
        let image_url = image_url.into();
        let has_image = !image_url.trim().is_empty();
        {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.image_url = image_url.clone();
        }
        let before = self.current();
        let after = self.apply(PresentationEvent::ImageChanged(has_image));
        if before == after && after != Surface::LiveVideo {
            self.surface.show(after, &image_url);
        }
    }

    /// Wait until the live video is visible, bounded by `timeout`
    pub async fn wait_for_live(&self, timeout: std::time::Duration) -> bool {
        let mut rx = self.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|s| *s == Surface::LiveVideo)).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => {
                warn!("Presentation channel closed while waiting for live video");
                false
            }
            Err(_) => false,
        }
    }
}
