//! IRCv3 capability negotiation (client side).
//!
//! [`CapabilityNegotiator`] is a sans-IO state machine: its methods return
//! the line to send (if any) and never touch a socket.
//!
//! ```text
//! Idle --start()--> Listing --queue()--> Negotiating --last capability_done()--> Done
//! ```
//!
//! Capabilities move from the pending queue to the awaiting set on
//! [`flush`](CapabilityNegotiator::flush). `CAP END` is produced exactly
//! once, when the awaiting set drains with nothing left queued.
//!
//! # Reference
//! - IRCv3 Capability Negotiation: <https://ircv3.net/specs/extensions/capability-negotiation>

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{EngineError, Result};

/// `CAP LS` version requested at connection start.
pub const CAP_LS_VERSION: u32 = 302;

/// Negotiation progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NegotiationState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// `CAP LS` sent, waiting for the server's list.
    Listing,
    /// Capabilities requested, waiting for acknowledgements.
    Negotiating,
    /// `CAP END` produced.
    Done,
}

/// Split a `CAP LS`/`CAP NEW` list into `(name, value)` pairs.
pub fn parse_cap_list(list: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    list.split_whitespace().map(|cap| match cap.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (cap, None),
    })
}

/// Client capability negotiation state.
#[derive(Clone, Debug, Default)]
pub struct CapabilityNegotiator {
    state: NegotiationState,
    queue: BTreeSet<String>,
    waiting: HashSet<String>,
    held: HashSet<String>,
    enabled: HashSet<String>,
    offered: HashMap<String, Option<String>>,
}

impl CapabilityNegotiator {
    /// A negotiator in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Whether `CAP END` has been produced.
    pub fn is_done(&self) -> bool {
        self.state == NegotiationState::Done
    }

    /// Begin negotiation; returns the `CAP LS` line.
    pub fn start(&mut self) -> String {
        *self = Self::new();
        self.state = NegotiationState::Listing;
        format!("CAP LS {}", CAP_LS_VERSION)
    }

    /// Queue one capability for the next request.
    pub fn queue(&mut self, capability: impl Into<String>) {
        self.queue.insert(capability.into());
        if self.state == NegotiationState::Listing {
            self.state = NegotiationState::Negotiating;
        }
    }

    /// Queue several capabilities.
    pub fn queue_all<I, S>(&mut self, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for capability in capabilities {
            self.queue(capability);
        }
    }

    /// Whether anything is queued.
    pub fn has_queue(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Move the queue into the awaiting set; returns the `CAP REQ` line.
    pub fn flush(&mut self) -> Option<String> {
        if self.queue.is_empty() {
            return None;
        }
        let queue = std::mem::take(&mut self.queue);
        let request = queue.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        self.waiting.extend(queue);
        Some(format!("CAP REQ :{}", request))
    }

    /// Hold `capability` open until [`capability_done`](Self::capability_done)
    /// is called for it, even after the server acknowledges it.
    pub fn wait_for(&mut self, capability: impl Into<String>) {
        let capability = capability.into();
        self.held.insert(capability.clone());
        self.waiting.insert(capability);
    }

    /// Whether `capability` is awaiting completion.
    pub fn is_waiting(&self, capability: &str) -> bool {
        self.waiting.contains(capability)
    }

    /// Whether `capability` was explicitly held with [`wait_for`](Self::wait_for).
    pub fn is_held(&self, capability: &str) -> bool {
        self.held.contains(capability)
    }

    /// Whether anything is still awaiting completion.
    pub fn waiting_for_capabilities(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// Finish one capability. Returns `CAP END` when it was the last one.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvariantViolation`] if `capability` was not awaiting.
    pub fn capability_done(&mut self, capability: &str) -> Result<Option<String>> {
        if !self.waiting.remove(capability) {
            return Err(EngineError::InvariantViolation(format!(
                "capability {:?} completed but was never awaiting",
                capability
            )));
        }
        self.held.remove(capability);

        if self.waiting.is_empty() && self.queue.is_empty() {
            Ok(self.end())
        } else {
            Ok(None)
        }
    }

    /// End negotiation now; `None` if it already ended.
    pub fn end(&mut self) -> Option<String> {
        if self.state == NegotiationState::Done {
            return None;
        }
        self.state = NegotiationState::Done;
        Some("CAP END".to_string())
    }

    /// Record capabilities offered by `CAP LS` or `CAP NEW`.
    pub fn record_offered(&mut self, list: &str) {
        for (name, value) in parse_cap_list(list) {
            self.offered
                .insert(name.to_string(), value.map(str::to_string));
        }
    }

    /// Forget capabilities withdrawn by `CAP DEL`.
    pub fn record_withdrawn(&mut self, list: &str) {
        for (name, _) in parse_cap_list(list) {
            self.offered.remove(name);
            self.enabled.remove(name);
        }
    }

    /// Whether the server offered `capability`.
    pub fn is_offered(&self, capability: &str) -> bool {
        self.offered.contains_key(capability)
    }

    /// Value advertised for `capability` (e.g. SASL mechanisms).
    pub fn offered_value(&self, capability: &str) -> Option<&str> {
        self.offered.get(capability).and_then(|v| v.as_deref())
    }

    /// All offered capabilities.
    pub fn offered(&self) -> &HashMap<String, Option<String>> {
        &self.offered
    }

    /// Mark `capability` as accepted by the server.
    pub fn enable(&mut self, capability: &str) {
        self.enabled.insert(capability.to_string());
    }

    /// Mark `capability` as no longer active.
    pub fn disable(&mut self, capability: &str) {
        self.enabled.remove(capability);
    }

    /// Whether `capability` is active.
    pub fn is_enabled(&self, capability: &str) -> bool {
        self.enabled.contains(capability)
    }

    /// All active capabilities.
    pub fn enabled(&self) -> &HashSet<String> {
        &self.enabled
    }
}
