//! Browser automation for camguardd
//!
//! This crate provides:
//! - The `BrowserDriver` trait and its W3C WebDriver implementation
//! - `BrowserControlChannel`: a single worker task that owns the driver,
//!   serializes operations, health-checks the session and relaunches it
//! - A mock driver for testing

mod channel;
mod driver;
mod mock;
mod webdriver;

pub use channel::*;
pub use driver::*;
pub use mock::*;
pub use webdriver::*;
