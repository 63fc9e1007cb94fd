use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::PageError;
use crate::page::{Locator, Page, PageProvider};

/// The two observed shapes of the booking flow.
///
/// `AlwaysDeep` runs every step through to the calendar and reads emptiness
/// off the final cell set; `EarlyExit` skips the frame switch but probes for
/// the site's "no appointments" message right after the CAPTCHA step. The
/// differing retry budgets (10 vs 1) are a real behavioral difference
/// between the two flows, kept as per-variant defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FlowVariant {
    AlwaysDeep,
    EarlyExit,
}

impl FlowVariant {
    pub fn default_attempts(self) -> u32 {
        match self {
            Self::AlwaysDeep => 10,
            Self::EarlyExit => 1,
        }
    }
}

/// One ordered action against the page. Steps are read-only configuration,
/// built once per run from `MonitorConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub action: StepAction,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Load { url: String },
    Click { locator: Locator },
    ClickJs { locator: Locator },
    AcceptAlert,
    EnterFrame { locator: Locator },
    Pause,
    /// Short probe for the "no appointments" marker; a hit ends the attempt
    /// with `NoSlots`, absence just moves on.
    ProbeEmpty { marker: String },
    /// Terminal step: collect available-cell texts and decide the outcome.
    CollectDates { locator: Locator },
}

/// Build the per-variant step sequence.
pub fn step_sequence(config: &MonitorConfig) -> Vec<Step> {
    let wait = config.wait_timeout();
    let mut steps = vec![
        Step {
            name: "landing page",
            action: StepAction::Load {
                url: config.start_url.clone(),
            },
            timeout: wait,
        },
        Step {
            name: "cookie consent",
            action: StepAction::Click {
                locator: Locator::xpath(format!(
                    "//input[@value='{}']",
                    config.cookie_accept_value
                )),
            },
            timeout: wait,
        },
        Step {
            name: "consent settle",
            action: StepAction::Pause,
            timeout: config.settle_pause(),
        },
        Step {
            name: "booking link",
            action: StepAction::ClickJs {
                locator: Locator::partial_link_text(config.booking_link_text.clone()),
            },
            timeout: wait,
        },
        Step {
            name: "welcome alert",
            action: StepAction::AcceptAlert,
            timeout: wait,
        },
    ];

    if config.variant == FlowVariant::AlwaysDeep {
        steps.push(Step {
            name: "booking frame",
            action: StepAction::EnterFrame {
                locator: Locator::css(format!("iframe[src*='{}']", config.frame_url_fragment)),
            },
            timeout: wait,
        });
    }

    steps.push(Step {
        name: "captcha continue",
        action: StepAction::Click {
            locator: Locator::id(config.captcha_button_id.clone()),
        },
        timeout: wait,
    });

    if config.variant == FlowVariant::EarlyExit {
        steps.push(Step {
            name: "empty-calendar probe",
            action: StepAction::ProbeEmpty {
                marker: config.no_slots_message.clone(),
            },
            timeout: config.probe_timeout(),
        });
    }

    steps.extend([
        Step {
            name: "notice accept",
            action: StepAction::Click {
                locator: Locator::id(config.notice_button_id.clone()),
            },
            timeout: wait,
        },
        Step {
            name: "service link",
            action: StepAction::Click {
                locator: Locator::partial_link_text(config.service_link_text.clone()),
            },
            timeout: wait,
        },
        Step {
            name: "calendar",
            action: StepAction::CollectDates {
                locator: Locator::xpath(format!("//td[@title='{}']/a", config.available_title)),
            },
            timeout: wait,
        },
    ]);

    steps
}

/// Why an attempt failed. Both kinds are transient as far as the retry
/// loop is concerned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("timed out at step '{step}'")]
    TimedOut { step: &'static str },

    #[error("unexpected failure at step '{step}': {detail}")]
    Unexpected { step: &'static str, detail: String },
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    SlotsFound(Vec<String>),
    NoSlots,
    Failed(FlowError),
}

/// Aggregate result of a whole monitoring run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorResult {
    SlotsFound(Vec<String>),
    NoSlots,
    ExhaustedRetries { attempts: u32, last: FlowError },
}

/// Drives fresh pages through the step sequence until an attempt yields a
/// real answer or the retry budget runs out.
pub struct Monitor<P: PageProvider> {
    provider: P,
    steps: Vec<Step>,
    attempts: u32,
}

impl<P: PageProvider> Monitor<P> {
    pub fn new(config: &MonitorConfig, provider: P) -> Self {
        Self {
            provider,
            steps: step_sequence(config),
            attempts: config.attempts(),
        }
    }

    /// One monitoring pass. Never fails outright: every per-attempt error
    /// is contained here, and only total exhaustion of the retry budget
    /// surfaces, as `ExhaustedRetries`.
    pub fn run_once(&self) -> MonitorResult {
        let mut last: Option<FlowError> = None;

        for attempt in 1..=self.attempts {
            info!(attempt, total = self.attempts, "starting flow attempt");

            let mut page = match self.provider.open_page() {
                Ok(page) => page,
                Err(err) => {
                    warn!(attempt, %err, "could not open a fresh page");
                    last = Some(FlowError::Unexpected {
                        step: "open page",
                        detail: err.to_string(),
                    });
                    continue;
                }
            };

            let outcome = run_attempt(&mut page, &self.steps);

            // The page is released on every path, failed attempts included.
            if let Err(err) = page.close() {
                warn!(attempt, %err, "page teardown failed");
            }

            match outcome {
                FlowOutcome::SlotsFound(dates) => {
                    info!(attempt, slots = dates.len(), "appointment slots found");
                    return MonitorResult::SlotsFound(dates);
                }
                FlowOutcome::NoSlots => {
                    info!(attempt, "no appointment slots available");
                    return MonitorResult::NoSlots;
                }
                FlowOutcome::Failed(err) => {
                    warn!(attempt, %err, "attempt failed, retrying from a fresh page");
                    last = Some(err);
                }
            }
        }

        MonitorResult::ExhaustedRetries {
            attempts: self.attempts,
            last: last.unwrap_or(FlowError::Unexpected {
                step: "retry loop",
                detail: "no attempt was made".to_string(),
            }),
        }
    }
}

/// Run the full step sequence against one page and report how it went.
pub fn run_attempt<P: Page>(page: &mut P, steps: &[Step]) -> FlowOutcome {
    for step in steps {
        debug!(step = step.name, "executing step");

        let result = match &step.action {
            StepAction::Load { url } => page.load(url),
            StepAction::Click { locator } => page.click_when_clickable(locator, step.timeout),
            StepAction::ClickJs { locator } => page.click_js_when_present(locator, step.timeout),
            StepAction::AcceptAlert => match page.accept_alert(step.timeout) {
                Ok(text) => {
                    debug!(alert = %text, "accepted dialog");
                    Ok(())
                }
                Err(err) => Err(err),
            },
            StepAction::EnterFrame { locator } => page.enter_frame(locator, step.timeout),
            StepAction::Pause => {
                page.pause(step.timeout);
                Ok(())
            }
            StepAction::ProbeEmpty { marker } => match page.text_present(marker, step.timeout) {
                Ok(true) => return FlowOutcome::NoSlots,
                Ok(false) => Ok(()),
                Err(err) => Err(err),
            },
            StepAction::CollectDates { locator } => {
                return match page.collect_texts(locator, step.timeout) {
                    Ok(dates) if dates.is_empty() => FlowOutcome::NoSlots,
                    Ok(dates) => FlowOutcome::SlotsFound(dates),
                    Err(err) => step_failure(step, err),
                };
            }
        };

        if let Err(err) = result {
            return step_failure(step, err);
        }
    }

    // The sequence always ends in CollectDates; reaching here means the
    // sequence was built without a terminal step.
    FlowOutcome::Failed(FlowError::Unexpected {
        step: "sequence end",
        detail: "step sequence has no terminal calendar step".to_string(),
    })
}

fn step_failure(step: &Step, err: PageError) -> FlowOutcome {
    if err.is_timeout() {
        FlowOutcome::Failed(FlowError::TimedOut { step: step.name })
    } else {
        FlowOutcome::Failed(FlowError::Unexpected {
            step: step.name,
            detail: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// What the scripted page should do when the flow reaches it.
    #[derive(Debug, Clone)]
    enum Script {
        /// Whole flow succeeds; the calendar yields these dates.
        Dates(Vec<&'static str>),
        /// Whole flow succeeds; the calendar is empty.
        EmptyCalendar,
        /// The cookie-consent wait always times out.
        CookieTimeout,
        /// The "no appointments" probe hits.
        ProbeHit,
        /// Cookie wait times out on the first `n` attempts, then the flow
        /// succeeds with these dates.
        FailFirst(u32, Vec<&'static str>),
    }

    #[derive(Debug, Default)]
    struct FakeState {
        opened: u32,
        closed: u32,
        calls: Vec<&'static str>,
    }

    struct FakeProvider {
        script: Script,
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeProvider {
        fn new(script: Script) -> (Self, Arc<Mutex<FakeState>>) {
            let state = Arc::new(Mutex::new(FakeState::default()));
            (
                Self {
                    script,
                    state: state.clone(),
                },
                state,
            )
        }
    }

    impl PageProvider for FakeProvider {
        type Page = FakePage;

        fn open_page(&self) -> Result<FakePage, PageError> {
            let mut state = self.state.lock().unwrap();
            state.opened += 1;
            Ok(FakePage {
                script: self.script.clone(),
                attempt: state.opened,
                state: self.state.clone(),
                clicks: 0,
            })
        }
    }

    struct FakePage {
        script: Script,
        attempt: u32,
        state: Arc<Mutex<FakeState>>,
        clicks: u32,
    }

    impl FakePage {
        fn record(&self, call: &'static str) {
            self.state.lock().unwrap().calls.push(call);
        }

        fn timeout() -> PageError {
            PageError::timed_out("scripted element", Duration::from_secs(20))
        }
    }

    impl Page for FakePage {
        fn load(&mut self, _url: &str) -> Result<(), PageError> {
            self.record("load");
            Ok(())
        }

        fn click_when_clickable(
            &mut self,
            _locator: &Locator,
            _timeout: Duration,
        ) -> Result<(), PageError> {
            self.record("click");
            self.clicks += 1;
            // The first clickable wait on each page is the cookie banner.
            if self.clicks == 1 {
                match self.script {
                    Script::CookieTimeout => return Err(Self::timeout()),
                    Script::FailFirst(n, _) if self.attempt <= n => return Err(Self::timeout()),
                    _ => {}
                }
            }
            Ok(())
        }

        fn click_js_when_present(
            &mut self,
            _locator: &Locator,
            _timeout: Duration,
        ) -> Result<(), PageError> {
            self.record("click_js");
            Ok(())
        }

        fn accept_alert(&mut self, _timeout: Duration) -> Result<String, PageError> {
            self.record("accept_alert");
            Ok("Bienvenido".to_string())
        }

        fn enter_frame(&mut self, _locator: &Locator, _timeout: Duration) -> Result<(), PageError> {
            self.record("enter_frame");
            Ok(())
        }

        fn text_present(&mut self, _marker: &str, _timeout: Duration) -> Result<bool, PageError> {
            self.record("probe");
            Ok(matches!(self.script, Script::ProbeHit))
        }

        fn collect_texts(
            &mut self,
            _locator: &Locator,
            _timeout: Duration,
        ) -> Result<Vec<String>, PageError> {
            self.record("collect");
            match &self.script {
                Script::EmptyCalendar => Ok(Vec::new()),
                Script::Dates(dates) | Script::FailFirst(_, dates) => {
                    Ok(dates.iter().map(|d| d.to_string()).collect())
                }
                _ => Ok(Vec::new()),
            }
        }

        fn pause(&mut self, _duration: Duration) {
            self.record("pause");
        }

        fn close(&mut self) -> Result<(), PageError> {
            self.state.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    fn config(variant: FlowVariant) -> MonitorConfig {
        MonitorConfig {
            variant,
            ..Default::default()
        }
    }

    fn assert_all_pages_released(state: &Arc<Mutex<FakeState>>) {
        let state = state.lock().unwrap();
        assert_eq!(state.opened, state.closed, "every opened page must be closed");
    }

    #[test]
    fn slots_found_on_first_attempt_preserves_date_order() {
        let (provider, state) = FakeProvider::new(Script::Dates(vec!["12/01", "13/01", "19/01"]));
        let monitor = Monitor::new(&config(FlowVariant::AlwaysDeep), provider);

        let result = monitor.run_once();

        assert_eq!(
            result,
            MonitorResult::SlotsFound(vec![
                "12/01".to_string(),
                "13/01".to_string(),
                "19/01".to_string()
            ])
        );
        assert_eq!(state.lock().unwrap().opened, 1, "no retries on success");
        assert_all_pages_released(&state);
    }

    #[test]
    fn empty_calendar_is_no_slots_not_a_failure() {
        let (provider, state) = FakeProvider::new(Script::EmptyCalendar);
        let monitor = Monitor::new(&config(FlowVariant::AlwaysDeep), provider);

        assert_eq!(monitor.run_once(), MonitorResult::NoSlots);
        assert_eq!(state.lock().unwrap().opened, 1);
        assert_all_pages_released(&state);
    }

    #[test]
    fn cookie_timeout_exhausts_ten_attempts_on_always_deep() {
        let (provider, state) = FakeProvider::new(Script::CookieTimeout);
        let monitor = Monitor::new(&config(FlowVariant::AlwaysDeep), provider);

        let result = monitor.run_once();

        assert_eq!(
            result,
            MonitorResult::ExhaustedRetries {
                attempts: 10,
                last: FlowError::TimedOut {
                    step: "cookie consent"
                },
            }
        );
        assert_eq!(state.lock().unwrap().opened, 10);
        assert_all_pages_released(&state);
    }

    #[test]
    fn cookie_timeout_makes_exactly_one_attempt_on_early_exit() {
        let (provider, state) = FakeProvider::new(Script::CookieTimeout);
        let monitor = Monitor::new(&config(FlowVariant::EarlyExit), provider);

        let result = monitor.run_once();

        assert_eq!(
            result,
            MonitorResult::ExhaustedRetries {
                attempts: 1,
                last: FlowError::TimedOut {
                    step: "cookie consent"
                },
            }
        );
        assert_eq!(state.lock().unwrap().opened, 1);
        assert_all_pages_released(&state);
    }

    #[test]
    fn success_on_third_attempt_stops_the_retry_loop() {
        let (provider, state) = FakeProvider::new(Script::FailFirst(2, vec!["05/02"]));
        let monitor = Monitor::new(&config(FlowVariant::AlwaysDeep), provider);

        let result = monitor.run_once();

        assert_eq!(result, MonitorResult::SlotsFound(vec!["05/02".to_string()]));
        assert_eq!(state.lock().unwrap().opened, 3, "no fourth attempt");
        assert_all_pages_released(&state);
    }

    #[test]
    fn probe_hit_short_circuits_to_no_slots() {
        let (provider, state) = FakeProvider::new(Script::ProbeHit);
        let monitor = Monitor::new(&config(FlowVariant::EarlyExit), provider);

        assert_eq!(monitor.run_once(), MonitorResult::NoSlots);

        // Only the cookie and captcha clickable-waits ran; the notice and
        // service clicks after the probe never happened, nor the calendar.
        let state = state.lock().unwrap();
        let clicks = state.calls.iter().filter(|c| **c == "click").count();
        assert_eq!(clicks, 2);
        assert!(!state.calls.contains(&"collect"));
        assert_eq!(state.opened, state.closed);
    }

    #[test]
    fn run_once_is_idempotent_across_runs() {
        let (provider, state) = FakeProvider::new(Script::Dates(vec!["12/01"]));
        let monitor = Monitor::new(&config(FlowVariant::AlwaysDeep), provider);

        let first = monitor.run_once();
        let second = monitor.run_once();

        assert_eq!(first, second);
        assert_all_pages_released(&state);
    }

    #[test]
    fn always_deep_sequence_has_frame_step_and_no_probe() {
        let steps = step_sequence(&config(FlowVariant::AlwaysDeep));
        assert!(
            steps
                .iter()
                .any(|s| matches!(s.action, StepAction::EnterFrame { .. }))
        );
        assert!(
            !steps
                .iter()
                .any(|s| matches!(s.action, StepAction::ProbeEmpty { .. }))
        );
        assert!(matches!(
            steps.last().unwrap().action,
            StepAction::CollectDates { .. }
        ));
    }

    #[test]
    fn early_exit_sequence_has_probe_after_captcha_and_no_frame_step() {
        let steps = step_sequence(&config(FlowVariant::EarlyExit));
        assert!(
            !steps
                .iter()
                .any(|s| matches!(s.action, StepAction::EnterFrame { .. }))
        );

        let captcha = steps
            .iter()
            .position(|s| s.name == "captcha continue")
            .unwrap();
        let probe = steps
            .iter()
            .position(|s| matches!(s.action, StepAction::ProbeEmpty { .. }))
            .unwrap();
        assert_eq!(probe, captcha + 1);
    }

    #[test]
    fn probe_uses_the_short_timeout() {
        let cfg = config(FlowVariant::EarlyExit);
        let steps = step_sequence(&cfg);
        let probe = steps
            .iter()
            .find(|s| matches!(s.action, StepAction::ProbeEmpty { .. }))
            .unwrap();
        assert_eq!(probe.timeout, cfg.probe_timeout());
        assert!(probe.timeout < cfg.wait_timeout());
    }
}
