//! Post-formation span filter.
//!
//! [`DroppingSpanProcessor`] sits in front of another [`SpanProcessor`] and
//! discards finished spans carrying an attribute whose key starts with a
//! configured prefix. Everything else, including flush and shutdown, is handed to
//! the wrapped processor unchanged.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use opentelemetry::Context;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{Span, SpanData, SpanProcessor};
use tracing::{debug, warn};

use crate::attributes::AttributeSnapshot;
use crate::config::Config;
use crate::error::FilterError;

const CREATED: u8 = 0;
const ACTIVE: u8 = 1;
const SHUTTING_DOWN: u8 = 2;
const SHUTDOWN: u8 = 3;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorState {
    Created,
    Active,
    ShuttingDown,
    Shutdown,
}

impl ProcessorState {
    fn from_u8(state: u8) -> Self {
        match state {
            CREATED => ProcessorState::Created,
            ACTIVE => ProcessorState::Active,
            SHUTTING_DOWN => ProcessorState::ShuttingDown,
            _ => ProcessorState::Shutdown,
        }
    }
}

/// Counts an `on_end` call for as long as it is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Finds the first attribute key starting with a prefix.
pub(crate) type KeyLookup = for<'a> fn(&AttributeSnapshot<'a>, &str) -> Option<&'a str>;

fn prefixed_key<'a>(attributes: &AttributeSnapshot<'a>, prefix: &str) -> Option<&'a str> {
    attributes.find_key_with_prefix(prefix)
}

/// Checks a filter prefix before anything is handed over to the filter.
pub fn validate_prefix(prefix: Option<&str>) -> Result<&str, FilterError> {
    match prefix {
        Some(prefix) if !prefix.is_empty() => Ok(prefix),
        _ => Err(FilterError::EmptyPrefix),
    }
}

/// Drops finished spans that carry an attribute key starting with `prefix`.
///
/// Lifecycle is `Created -> Active -> ShuttingDown -> Shutdown`. The first call
/// of any kind activates the processor. Once shutdown starts, spans that were
/// already being forwarded are waited for (bounded by the drain timeout) and
/// new ones are ignored. After shutdown every call is a no-op reporting success.
#[derive(Debug)]
pub struct DroppingSpanProcessor<P> {
    next: P,
    prefix: String,
    state: AtomicU8,
    in_flight: AtomicUsize,
    drain_timeout: Duration,
    lookup: KeyLookup,
}

impl<P: SpanProcessor> DroppingSpanProcessor<P> {
    pub fn new(next: P, prefix: impl Into<String>) -> Result<Self, FilterError> {
        let prefix = prefix.into();
        validate_prefix(Some(&prefix))?;
        Ok(Self::with_valid_prefix(next, prefix))
    }

    /// `prefix` must already have passed [`validate_prefix`].
    pub(crate) fn with_valid_prefix(next: P, prefix: String) -> Self {
        Self {
            next,
            prefix,
            state: AtomicU8::new(CREATED),
            in_flight: AtomicUsize::new(0),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            lookup: prefixed_key,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_key_lookup(mut self, lookup: KeyLookup) -> Self {
        self.lookup = lookup;
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Builds the filter from the configured prefix and drain timeout.
    pub fn from_config(next: P, config: &Config) -> Result<Self, FilterError> {
        let prefix = validate_prefix(config.drop_attribute_prefix.as_deref())?;
        Ok(Self::with_valid_prefix(next, prefix.to_string())
            .with_drain_timeout(config.drain_timeout()))
    }

    #[must_use]
    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    #[must_use]
    pub fn next(&self) -> &P {
        &self.next
    }

    fn activate(&self) {
        let _ = self
            .state
            .compare_exchange(CREATED, ACTIVE, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn accepts_spans(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }

    /// Waits for forwards that started before shutdown. Returns `false` on timeout.
    fn drain(&self) -> bool {
        let deadline = Instant::now() + self.drain_timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(DRAIN_POLL_INTERVAL);
        }
        true
    }
}

impl<P: SpanProcessor> SpanProcessor for DroppingSpanProcessor<P> {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        self.activate();
        if self.accepts_spans() {
            self.next.on_start(span, cx);
        }
    }

    fn on_end(&self, span: SpanData) {
        self.activate();
        // Register before checking the state so shutdown either sees this call
        // or this call sees shutdown.
        let _in_flight = InFlight::enter(&self.in_flight);
        if !self.accepts_spans() {
            return;
        }

        let snapshot = AttributeSnapshot::new(&span.attributes);
        let matched = catch_panic!("FILTER", (self.lookup)(&snapshot, &self.prefix), None);
        if let Some(key) = matched {
            debug!(
                "FILTER | Dropping span '{}', attribute '{key}' starts with '{}'",
                span.name, self.prefix
            );
            return;
        }

        self.next.on_end(span);
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.activate();
        if self.state() == ProcessorState::Shutdown {
            return Ok(());
        }
        self.next.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.activate();
        if self
            .state
            .compare_exchange(ACTIVE, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("FILTER | Shutdown already requested");
            return Ok(());
        }

        if !self.drain() {
            warn!(
                "FILTER | {} span(s) still in flight after {}ms, shutting down anyway",
                self.in_flight.load(Ordering::SeqCst),
                self.drain_timeout.as_millis()
            );
        }

        let result = self.next.shutdown();
        self.state.store(SHUTDOWN, Ordering::SeqCst);
        result
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.next.set_resource(resource);
    }
}
