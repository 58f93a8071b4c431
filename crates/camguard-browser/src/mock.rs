//! Mock browser driver for testing

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{BrowserDriver, DriverError, DriverResult};

/// A recorded driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Launch,
    Navigate(String),
    Keys(Vec<String>),
    Reload,
    Location,
    Quit,
}

#[derive(Default)]
struct MockState {
    calls: Vec<DriverCall>,
    location: String,
    in_flight: usize,
    max_in_flight: usize,
    delay: Duration,
    fail_calls: u32,
    fail_launches: u32,
    hang_calls: u32,
    fatal: bool,
}

/// Records calls and fails on demand.
///
/// Failure toggles apply to page calls (navigate, keys, reload, location);
/// launches have their own counter; quit always succeeds.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

/// Decrements the in-flight counter even when the call is cancelled
struct InFlight(Arc<Mutex<MockState>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.lock().unwrap().in_flight -= 1;
    }
}

enum Fate {
    Succeed,
    Fail(DriverError),
    Hang,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    /// Highest number of calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    /// Make every call take `delay`
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Fail the next `n` page calls with a transient error
    pub fn fail_next_calls(&self, n: u32) {
        self.state.lock().unwrap().fail_calls = n;
    }

    /// Fail the next `n` launches (`u32::MAX` for all of them)
    pub fn fail_launches(&self, n: u32) {
        self.state.lock().unwrap().fail_launches = n;
    }

    /// Never complete the next `n` page calls
    pub fn hang_next_calls(&self, n: u32) {
        self.state.lock().unwrap().hang_calls = n;
    }

    /// Fail every page call with a fatal error
    pub fn fail_fatally(&self, fatal: bool) {
        self.state.lock().unwrap().fatal = fatal;
    }

    async fn step(&self, call: DriverCall) -> DriverResult<()> {
        let (delay, fate) = {
            let mut s = self.state.lock().unwrap();
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);

            let fate = match &call {
                DriverCall::Quit => Fate::Succeed,
                DriverCall::Launch if s.fail_launches > 0 => {
                    if s.fail_launches != u32::MAX {
                        s.fail_launches -= 1;
                    }
                    Fate::Fail(DriverError::Transient("mock launch failure".into()))
                }
                DriverCall::Launch => Fate::Succeed,
                _ if s.fatal => Fate::Fail(DriverError::Fatal("mock fatal failure".into())),
                _ if s.hang_calls > 0 => {
                    s.hang_calls -= 1;
                    Fate::Hang
                }
                _ if s.fail_calls > 0 => {
                    s.fail_calls -= 1;
                    Fate::Fail(DriverError::Transient("mock failure".into()))
                }
                _ => Fate::Succeed,
            };
            s.calls.push(call);
            (s.delay, fate)
        };
        let _guard = InFlight(self.state.clone());

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match fate {
            Fate::Succeed => Ok(()),
            Fate::Fail(e) => Err(e),
            Fate::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn launch(&mut self) -> DriverResult<()> {
        self.step(DriverCall::Launch).await
    }

    async fn navigate(&mut self, url: &str) -> DriverResult<()> {
        self.step(DriverCall::Navigate(url.to_string())).await?;
        self.state.lock().unwrap().location = url.to_string();
        Ok(())
    }

    async fn send_key_sequence(&mut self, keys: &[String]) -> DriverResult<()> {
        self.step(DriverCall::Keys(keys.to_vec())).await
    }

    async fn reload(&mut self) -> DriverResult<()> {
        self.step(DriverCall::Reload).await
    }

    async fn current_location(&mut self) -> DriverResult<String> {
        self.step(DriverCall::Location).await?;
        Ok(self.state.lock().unwrap().location.clone())
    }

    async fn quit(&mut self) -> DriverResult<()> {
        self.step(DriverCall::Quit).await
    }
}
