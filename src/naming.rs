use std::sync::Arc;

use crate::config::SamConfig;
use crate::control::ControlChannel;
use crate::destination::{Destination, DestinationHash};
use crate::error::{Result, ResultCode, SamError};
use crate::protocol::Command;
use crate::utils::log::log_debug;

/// Name and key helper on a control channel of its own.
#[derive(Debug, Clone)]
pub struct Resolver {
    channel: Arc<ControlChannel>,
}

impl Resolver {
    pub fn new(channel: Arc<ControlChannel>) -> Self {
        Self { channel }
    }

    pub async fn connect(config: SamConfig) -> Result<Self> {
        Ok(Self::new(ControlChannel::connect(config).await?))
    }

    pub fn channel(&self) -> &Arc<ControlChannel> {
        &self.channel
    }

    /// Resolve a hostname, `.b32.i2p` address or `ME`.
    pub async fn lookup(&self, name: &str) -> Result<Destination> {
        lookup_on(&self.channel, name).await
    }

    pub async fn lookup_hash(&self, hash: &DestinationHash) -> Result<Destination> {
        lookup_on(&self.channel, &hash.to_b32_address()).await
    }

    /// Ask the router for a fresh keypair. The result carries its private keys.
    pub async fn generate_destination(&self, signature_type: Option<u16>) -> Result<Destination> {
        let reply = self
            .channel
            .execute(Command::dest_generate(signature_type))
            .await?;
        reply.expect("DEST", "REPLY")?;
        // Older routers omit RESULT on success.
        let reply = match reply.result_code() {
            None => reply,
            Some(_) => reply.into_result("DEST GENERATE")?,
        };

        let private = reply
            .get("PRIV")
            .ok_or_else(|| SamError::protocol("DEST REPLY without PRIV"))?;
        let destination = Destination::from_private_base64(private)?;
        if let Some(public) = reply.get("PUB") {
            let announced = Destination::from_base64(public)?;
            if announced.as_bytes() != destination.as_bytes() {
                return Err(SamError::protocol("DEST REPLY PUB does not match PRIV"));
            }
        }
        Ok(destination)
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

pub(crate) async fn lookup_on(channel: &ControlChannel, name: &str) -> Result<Destination> {
    let reply = channel.execute(Command::naming_lookup(name)).await?;
    reply.expect("NAMING", "REPLY")?;
    let reply = reply.into_result("NAMING LOOKUP")?;

    let value = reply
        .get("VALUE")
        .ok_or_else(|| SamError::protocol("NAMING REPLY without VALUE"))?;
    log_debug!("Resolver", "{} resolved", name);
    Destination::from_base64(value)
}

/// True when `err` only means the name is unknown.
pub fn is_not_found(err: &SamError) -> bool {
    err.result_code() == Some(ResultCode::KeyNotFound)
}
