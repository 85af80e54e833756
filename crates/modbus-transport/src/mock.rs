use crate::{ReadRequest, RegisterBus, Result, TransportError, UnitId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Shared record of every read a [`MockBus`] served, in order.
#[derive(Clone, Debug, Default)]
pub struct ReadLog(Arc<Mutex<Vec<ReadRequest>>>);

impl ReadLog {
    pub fn requests(&self) -> Vec<ReadRequest> {
        match self.0.lock() {
            Ok(log) => log.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn push(&self, req: ReadRequest) {
        if let Ok(mut log) = self.0.lock() {
            log.push(req);
        }
    }
}

/// A simple in-process register bank. Each bus instance is independent.
///
/// Registers that were never loaded read back as zero, like unimplemented
/// input registers on many inverters.
pub struct MockBus {
    name: String,
    words: HashMap<u16, u16>,
    failing: HashSet<u16>,
    offline: bool,
    log: ReadLog,
}

impl MockBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            words: HashMap::new(),
            failing: HashSet::new(),
            offline: false,
            log: ReadLog::default(),
        }
    }

    /// Load consecutive words starting at `address`.
    pub fn with_words(mut self, address: u16, words: &[u16]) -> Self {
        for (i, w) in words.iter().enumerate() {
            self.words.insert(address.wrapping_add(i as u16), *w);
        }
        self
    }

    /// Make every read that starts at `address` time out.
    pub fn fail_at(mut self, address: u16) -> Self {
        self.failing.insert(address);
        self
    }

    /// Make every read fail as if the device were unreachable.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn read_log(&self) -> ReadLog {
        self.log.clone()
    }
}

#[async_trait]
impl RegisterBus for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: UnitId,
    ) -> Result<Vec<u16>> {
        let req = ReadRequest::new(address, count, unit)
            .ok_or(TransportError::InvalidRequest("register span"))?;
        self.log.push(req);
        if self.offline {
            return Err(TransportError::Connect {
                endpoint: self.name.clone(),
                reason: "mock device offline".to_string(),
            });
        }
        if self.failing.contains(&address) {
            return Err(TransportError::Timeout);
        }
        Ok((0..count)
            .map(|i| {
                self.words
                    .get(&address.wrapping_add(i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }
}
