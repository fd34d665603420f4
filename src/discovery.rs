// MIT License - Copyright (c) 2026 telenot-bridge authors
// Discovery of used addresses and their names

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::event::{ContactKind, DiscoveredAddresses, DiscoveredContact};
use crate::message::MessageType;
use crate::protocol::OutputPartition;

/// Where the discovery conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    /// Nothing requested or everything named.
    Idle,
    /// Used-state requested; waiting for the bitmaps.
    AwaitingBitmaps,
    /// Bitmaps received; naming one address per panel poll.
    Naming,
}

/// Address queues walked during discovery.
///
/// The panel's contact-info answer does not echo the address, so each answer
/// belongs to the head of the queue that was current when it was requested.
/// Heads are only removed once their answer arrives.
#[derive(Debug)]
pub struct DiscoveryQueues {
    phase: DiscoveryPhase,
    inputs: VecDeque<u16>,
    reporting_areas: VecDeque<u16>,
    found: DiscoveredAddresses,
}

impl Default for DiscoveryQueues {
    fn default() -> Self {
        Self {
            phase: DiscoveryPhase::Idle,
            inputs: VecDeque::new(),
            reporting_areas: VecDeque::new(),
            found: DiscoveredAddresses::default(),
        }
    }
}

impl DiscoveryQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    /// The used-state request went out. Drops any unfinished walk.
    pub fn start(&mut self) {
        self.inputs.clear();
        self.reporting_areas.clear();
        self.found = DiscoveredAddresses::default();
        self.phase = DiscoveryPhase::AwaitingBitmaps;
    }

    /// Queue the used inputs (ascending).
    pub fn on_used_inputs(&mut self, addresses: Vec<u16>) {
        if self.phase == DiscoveryPhase::Idle {
            // answer to a request made by someone else; walk it anyway
            self.start();
        }
        debug!("Used inputs: {} addresses", addresses.len());
        self.inputs = addresses.iter().copied().collect();
        self.found.inputs = addresses;
    }

    /// Queue the used reporting areas and record outputs and security areas.
    ///
    /// The outputs bitmap is the last answer to a used-state request, so
    /// naming starts here.
    pub fn on_used_outputs(&mut self, partition: OutputPartition) {
        if self.phase == DiscoveryPhase::Idle {
            self.start();
        }
        debug!(
            "Used outputs: {} outputs, security areas {:?}, {} reporting areas",
            partition.outputs.len(),
            partition.security_areas,
            partition.reporting_areas.len()
        );
        self.reporting_areas = partition.reporting_areas.iter().copied().collect();
        self.found.outputs = partition.outputs;
        self.found.security_areas = partition.security_areas;
        self.found.reporting_areas = partition.reporting_areas;
        self.phase = DiscoveryPhase::Naming;
    }

    /// Address to ask a name for on the next poll: inputs first, then reporting areas.
    pub fn next_request(&self) -> Option<u16> {
        self.inputs
            .front()
            .or_else(|| self.reporting_areas.front())
            .copied()
    }

    /// Remove and return the queue head a contact-info answer belongs to.
    ///
    /// Only input and reporting area answers are paired; the panel is never
    /// asked for the others.
    pub fn take_head(&mut self, msg_type: MessageType) -> Option<(ContactKind, u16)> {
        match msg_type {
            MessageType::UsedContactsInfo => {
                self.inputs.pop_front().map(|a| (ContactKind::Input, a))
            }
            MessageType::UsedMbContactsInfo => self
                .reporting_areas
                .pop_front()
                .map(|a| (ContactKind::ReportingArea, a)),
            MessageType::NotUsedContact => self
                .inputs
                .pop_front()
                .map(|a| (ContactKind::Input, a))
                .or_else(|| {
                    self.reporting_areas
                        .pop_front()
                        .map(|a| (ContactKind::ReportingArea, a))
                }),
            _ => None,
        }
    }

    /// Record the name of a paired address.
    pub fn record_name(&mut self, kind: ContactKind, address: u16, name: String) -> DiscoveredContact {
        let contact = DiscoveredContact {
            kind,
            address,
            name,
        };
        self.found.contacts.push(contact.clone());
        contact
    }

    /// Finish the walk once both queues are empty. Returns the result exactly once.
    pub fn check_complete(&mut self) -> Option<DiscoveredAddresses> {
        if self.phase != DiscoveryPhase::Naming
            || !self.inputs.is_empty()
            || !self.reporting_areas.is_empty()
        {
            return None;
        }
        self.phase = DiscoveryPhase::Idle;
        info!(
            "Discovery complete: {} inputs, {} outputs, {} security areas, {} reporting areas, {} names",
            self.found.inputs.len(),
            self.found.outputs.len(),
            self.found.security_areas.len(),
            self.found.reporting_areas.len(),
            self.found.contacts.len()
        );
        Some(self.found.clone())
    }

    /// Everything found by the last walk so far.
    pub fn discovered(&self) -> &DiscoveredAddresses {
        &self.found
    }
}
