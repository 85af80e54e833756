use crate::{Endpoint, ReadRequest, RegisterBus, Result, TransportConfig, TransportError, UnitId};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{self, Context};
use tokio_modbus::prelude::{Reader, Slave, SlaveContext};
use tracing::{debug, warn};

const READ_INPUT_REGISTERS: u8 = 0x04;

enum Link {
    Up(Context),
    /// An exchange was abandoned mid-frame; the socket must be replaced before reuse.
    Stale,
    /// Unreachable at startup. Every read fails with this reason.
    Down(String),
}

/// Modbus TCP client holding one long-lived connection.
pub struct TcpBus {
    name: String,
    endpoint: Endpoint,
    config: TransportConfig,
    link: Link,
}

async fn open(endpoint: &Endpoint) -> io::Result<Context> {
    let addr = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
    client::tcp::connect_slave(addr, Slave::tcp_device()).await
}

async fn dial(endpoint: &Endpoint, wait: Duration) -> Result<Context> {
    let reason = match timeout(wait, open(endpoint)).await {
        Ok(Ok(ctx)) => return Ok(ctx),
        Ok(Err(e)) => e.to_string(),
        Err(_) => "timed out".to_string(),
    };
    Err(TransportError::Connect {
        endpoint: endpoint.to_string(),
        reason,
    })
}

impl TcpBus {
    /// Open the connection. It is only replaced after a timed-out exchange.
    pub async fn connect(endpoint: &Endpoint, config: TransportConfig) -> Result<Self> {
        let ctx = dial(endpoint, config.timeout).await?;
        debug!("connected to {}", endpoint);
        Ok(Self {
            name: endpoint.to_string(),
            endpoint: endpoint.clone(),
            config,
            link: Link::Up(ctx),
        })
    }

    /// A bus for a device that could not be reached; every read fails with `reason`.
    pub fn offline(endpoint: &Endpoint, config: TransportConfig, reason: impl Into<String>) -> Self {
        Self {
            name: endpoint.to_string(),
            endpoint: endpoint.clone(),
            config,
            link: Link::Down(reason.into()),
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.link, Link::Down(_))
    }

    async fn context(&mut self) -> Result<&mut Context> {
        if let Link::Down(reason) = &self.link {
            return Err(TransportError::Connect {
                endpoint: self.name.clone(),
                reason: reason.clone(),
            });
        }
        if matches!(self.link, Link::Stale) {
            debug!("{}: replacing connection after abandoned exchange", self.name);
            self.link = Link::Up(dial(&self.endpoint, self.config.timeout).await?);
        }
        match &mut self.link {
            Link::Up(ctx) => Ok(ctx),
            Link::Stale | Link::Down(_) => Err(TransportError::Connect {
                endpoint: self.name.clone(),
                reason: "no connection".to_string(),
            }),
        }
    }
}

#[async_trait]
impl RegisterBus for TcpBus {
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
        let wait = self.config.timeout;
        let attempts = self.config.retries.saturating_add(1);
        for attempt in 1..=attempts {
            let ctx = self.context().await?;
            ctx.set_slave(Slave(req.unit.0));
            let outcome = timeout(wait, ctx.read_input_registers(req.address, req.count)).await;
            match outcome {
                Ok(Ok(Ok(words))) if !words.is_empty() => return Ok(words),
                Ok(Ok(Ok(_))) => {
                    warn!(
                        "{}: empty response for {} (attempt {}/{})",
                        self.name, req, attempt, attempts
                    );
                }
                Ok(Ok(Err(code))) => {
                    return Err(TransportError::Exception {
                        function: READ_INPUT_REGISTERS,
                        code: u8::from(code),
                    })
                }
                Ok(Err(tokio_modbus::Error::Transport(e))) => return Err(e.into()),
                Ok(Err(tokio_modbus::Error::Protocol(e))) => {
                    self.link = Link::Stale;
                    return Err(TransportError::MalformedResponse(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        "{}: timeout reading {} (attempt {}/{})",
                        self.name, req, attempt, attempts
                    );
                    self.link = Link::Stale;
                }
            }
        }
        Err(TransportError::NoResponse(attempts))
    }
}
