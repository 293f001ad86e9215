//! Application workflow: sequences driver calls into probe, match and
//! enroll flows with retry and timeout policy.
//!
//! The whole flow is driven by [`Session::tick`], called once per
//! cooperative scheduler cycle. No state blocks: every wait inside the
//! codec is bounded, and every retry loop re-enters through the next tick.

use core::mem;

use crate::driver::Zw111;
use crate::error::Error;
use crate::port::Port;
use crate::protocol::CharBuffer;

/// Lowest template page id the workflow assigns.
pub const FIRST_PAGE: u16 = 1;

/// Workflow states. `Error` is a sink requiring external intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Passive; a start call moves to Probe.
    Idle,
    /// Flush, settle, read system info.
    Probe,
    /// Passive; consumes a pending request exactly once.
    Ready,
    /// Poll the sensor window for a finger.
    WaitFinger,
    /// Extract features from the captured image.
    GenChar,
    /// Load the probe cursor's template for comparison.
    LoadChar,
    /// Compare the capture against the loaded template.
    Match,
    EnrollStep1,
    EnrollStep2,
    EnrollStore,
    /// One-shot side effects, then back to Ready.
    Done,
    Error,
}

/// Pending external request, consumed exactly once by the Ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    None,
    Enroll,
    Match,
}

/// Outward notification hooks.
pub trait Notify {
    /// Fired once per Match-state terminal decision.
    fn match_result(&mut self, accepted: bool, page_id: u16, score: u16);

    /// Fired from Done after a successful enroll store.
    fn enroll_done(&mut self, page_id: u16) {
        let _ = page_id;
    }
}

/// Retry and timeout policy knobs.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Policy {
    /// WaitFinger window; expiry resets the timer in place.
    pub wait_finger_timeout_ms: u32,
    /// Minimum accepted similarity score.
    pub match_score_min: u16,
    /// Consecutive match rejections before giving up.
    pub match_max_tries: u8,
    /// Consecutive enroll step failures before escalating.
    pub enroll_max_tries: u8,
    /// Settle delay between the RX flush and the probe read.
    pub probe_settle_ms: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            wait_finger_timeout_ms: 3000,
            match_score_min: 50,
            match_max_tries: 5,
            enroll_max_tries: 8,
            probe_settle_ms: 50,
        }
    }
}

/// Workflow context, created once and mutated only by [`Session::tick`].
#[derive(Debug)]
pub struct Session {
    policy: Policy,
    state: State,
    entered_at: u32,
    pending: Request,
    match_tries: u8,
    enroll_tries: u8,
    /// Next free template page; grows on each successful store.
    next_page: u16,
    /// Match probe cursor over assigned pages.
    probe_page: u16,
    /// Page stored by the enroll flow, pending its Done notification.
    stored_page: Option<u16>,
    capacity: u16,
}

impl Session {
    pub fn new() -> Self {
        Self::with_policy(Policy::default())
    }

    pub fn with_policy(policy: Policy) -> Self {
        Self {
            policy,
            state: State::Idle,
            entered_at: 0,
            pending: Request::None,
            match_tries: 0,
            enroll_tries: 0,
            next_page: FIRST_PAGE,
            probe_page: FIRST_PAGE,
            stored_page: None,
            capacity: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Page id the next enroll will be stored at.
    pub fn next_page(&self) -> u16 {
        self.next_page
    }

    /// Database capacity learned during Probe.
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Kicks the workflow out of Idle into the probe sequence.
    pub fn start(&mut self) {
        if self.state == State::Idle {
            self.state = State::Probe;
        }
    }

    /// Queues an enroll request for the Ready state to consume.
    pub fn request_enroll(&mut self) {
        self.pending = Request::Enroll;
    }

    /// Queues a match request for the Ready state to consume.
    pub fn request_match(&mut self) {
        self.pending = Request::Match;
    }

    fn enter<P: Port>(&mut self, state: State, fp: &mut Zw111<'_, P>) {
        self.state = state;
        self.entered_at = fp.ticks();
    }

    fn elapsed_ms<P: Port>(&self, fp: &mut Zw111<'_, P>) -> u32 {
        let now = fp.ticks();
        fp.ticks_to_ms(now.wrapping_sub(self.entered_at))
    }

    /// Advances the workflow by one cooperative step.
    pub fn tick<P: Port, N: Notify>(&mut self, fp: &mut Zw111<'_, P>, notify: &mut N) -> State {
        match self.state {
            State::Idle => {}

            State::Probe => {
                fp.flush_rx();
                fp.delay_ms(self.policy.probe_settle_ms);
                match fp.read_sysinfo() {
                    Ok(info) => {
                        self.capacity = info.capacity;
                        info!(
                            "probe ok: capacity {} packet size code {}",
                            info.capacity, info.packet_size
                        );
                        self.enter(State::Ready, fp);
                    }
                    Err(e) => {
                        error!("probe failed: {}", e);
                        self.enter(State::Error, fp);
                    }
                }
            }

            State::Ready => match mem::replace(&mut self.pending, Request::None) {
                Request::Enroll => {
                    self.match_tries = 0;
                    self.enroll_tries = 0;
                    fp.enroll_start(self.next_page);
                    debug!("enroll requested, page {}", self.next_page);
                    self.enter(State::EnrollStep1, fp);
                }
                Request::Match => {
                    self.match_tries = 0;
                    self.enroll_tries = 0;
                    debug!("match requested");
                    self.enter(State::WaitFinger, fp);
                }
                Request::None => {}
            },

            State::WaitFinger => {
                if self.elapsed_ms(fp) > self.policy.wait_finger_timeout_ms {
                    // expiry is a soft reset, not a failure
                    debug!("finger wait window reset");
                    self.enter(State::WaitFinger, fp);
                } else {
                    match fp.get_image() {
                        Ok(()) => self.enter(State::GenChar, fp),
                        Err(Error::NoFinger) => {}
                        Err(e) => {
                            error!("image capture failed: {}", e);
                            self.enter(State::Error, fp);
                        }
                    }
                }
            }

            State::GenChar => match fp.gen_char(CharBuffer::One) {
                Ok(()) => {
                    self.probe_page = FIRST_PAGE;
                    self.enter(State::LoadChar, fp);
                }
                Err(e) => {
                    error!("feature extraction failed: {}", e);
                    self.enter(State::Error, fp);
                }
            },

            State::LoadChar => {
                if self.probe_page >= self.next_page {
                    // every assigned page was probed without a match
                    debug!("no candidate pages left");
                    self.enter(State::Ready, fp);
                } else {
                    match fp.load_char(CharBuffer::Two, self.probe_page) {
                        Ok(()) => self.enter(State::Match, fp),
                        Err(_) => {
                            self.probe_page += 1;
                            if self.probe_page >= self.next_page {
                                debug!("no candidate pages left");
                                self.enter(State::Ready, fp);
                            }
                        }
                    }
                }
            }

            State::Match => match fp.match_templates() {
                Ok(score) if score >= self.policy.match_score_min => {
                    info!("match accepted: page {} score {}", self.probe_page, score);
                    self.match_tries = 0;
                    notify.match_result(true, self.probe_page, score);
                    self.enter(State::Done, fp);
                }
                Ok(_) | Err(Error::NoMatch) => {
                    self.match_tries += 1;
                    if self.match_tries >= self.policy.match_max_tries {
                        info!("match rejected after {} tries", self.match_tries);
                        self.match_tries = 0;
                        self.enroll_tries = 0;
                        notify.match_result(false, 0, 0);
                        self.enter(State::Ready, fp);
                    } else {
                        self.probe_page += 1;
                        self.enter(State::LoadChar, fp);
                    }
                }
                Err(e) => {
                    error!("match failed: {}", e);
                    notify.match_result(false, 0, 0);
                    self.enter(State::Error, fp);
                }
            },

            State::EnrollStep1 => match fp.enroll_step1() {
                Ok(()) => {
                    self.enroll_tries = 0;
                    self.enter(State::EnrollStep2, fp);
                }
                Err(Error::NoFinger) => {}
                Err(e) => {
                    self.enroll_tries += 1;
                    if self.enroll_tries >= self.policy.enroll_max_tries {
                        error!("enroll step 1 gave up: {}", e);
                        self.enter(State::Error, fp);
                    }
                }
            },

            State::EnrollStep2 => match fp.enroll_step2() {
                Ok(()) => {
                    self.enroll_tries = 0;
                    self.enter(State::EnrollStore, fp);
                }
                Err(Error::NoFinger) => {}
                Err(e) => {
                    self.enroll_tries += 1;
                    if self.enroll_tries >= self.policy.enroll_max_tries {
                        error!("enroll step 2 gave up: {}", e);
                        self.enter(State::Error, fp);
                    }
                }
            },

            State::EnrollStore => {
                let page = self.next_page;
                match fp.enroll_store() {
                    Ok(()) => {
                        info!("template stored at page {}", page);
                        self.stored_page = Some(page);
                        self.next_page += 1;
                        self.enter(State::Done, fp);
                    }
                    Err(e) => {
                        error!("template store failed: {}", e);
                        self.enter(State::Error, fp);
                    }
                }
            }

            State::Done => {
                if let Some(page) = self.stored_page.take() {
                    notify.enroll_done(page);
                }
                self.enter(State::Ready, fp);
            }

            State::Error => {
                // sink: recovery needs external intervention
            }
        }
        self.state
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
