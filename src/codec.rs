//! ASCII command codec.
//!
//! Builds command lines, sends them through the injected transport, detects
//! the `:N` failure sentinel and parses the two reply shapes the controller
//! uses:
//!
//! - tagged: `X=12`, `:A P=3.0`
//! - tail: `:A 250`, value is the last space-separated token
//!
//! Numbers may carry a decimal point even when the firmware value is an
//! integer, so integers are float-parsed and then truncated.

use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::{AsiErrorCode, RigError, RigResult};
use crate::error_recovery::RetryPolicy;
use crate::transport::{DeviceHandle, SharedTransport};

/// Marker the controller puts in a reply to a rejected command.
pub const FAILURE_SENTINEL: &str = ":N";

/// Axis name taken from a compound `prefix:axis` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisLabel(String);

impl AxisLabel {
    /// Split `label` at its first `:` and keep the remainder.
    ///
    /// ```
    /// use tiger_rig::codec::AxisLabel;
    /// assert_eq!(AxisLabel::from_compound("PiezoStage:P").unwrap().as_str(), "P");
    /// assert!(AxisLabel::from_compound("PiezoStage").is_err());
    /// ```
    pub fn from_compound(label: &str) -> RigResult<Self> {
        match label.split_once(':') {
            Some((prefix, axis)) if !prefix.is_empty() && !axis.is_empty() => {
                Ok(Self(axis.to_string()))
            }
            _ => Err(RigError::InvalidDeviceLabel {
                label: label.to_string(),
            }),
        }
    }

    /// A bare axis name such as `"X"` or `"A"`.
    pub fn new(axis: &str) -> RigResult<Self> {
        let axis = axis.trim();
        if axis.is_empty() || axis.contains(char::is_whitespace) {
            return Err(RigError::InvalidDeviceLabel {
                label: axis.to_string(),
            });
        }
        Ok(Self(axis.to_string()))
    }

    /// The label as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AxisLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Card address at the end of a compound label (`"PLogic:E:36"` -> `"36"`).
pub fn card_address(label: &str) -> RigResult<&str> {
    match label.rsplit_once(':') {
        Some((prefix, addr)) if !prefix.is_empty() && !addr.is_empty() => Ok(addr),
        _ => Err(RigError::InvalidDeviceLabel {
            label: label.to_string(),
        }),
    }
}

/// Fail with [`RigError::DeviceCommand`] if `reply` contains the failure sentinel.
pub fn check_failure(command: &str, reply: &str) -> RigResult<()> {
    if reply.contains(FAILURE_SENTINEL) {
        return Err(RigError::DeviceCommand {
            command: command.to_string(),
            reply: reply.to_string(),
            code: AsiErrorCode::from_reply(reply),
        });
    }
    Ok(())
}

/// Token after the last `=` or whitespace.
fn tail_token(reply: &str) -> &str {
    let trimmed = reply.trim();
    trimmed
        .rsplit(|c: char| c == '=' || c.is_whitespace())
        .next()
        .unwrap_or(trimmed)
        .trim()
}

/// Parse the trailing numeric token of a reply as a float.
pub fn parse_tail_f64(parameter: &str, reply: &str) -> RigResult<f64> {
    tail_token(reply)
        .parse::<f64>()
        .map_err(|_| RigError::unexpected(parameter, reply))
}

/// Parse the trailing numeric token of a reply as an integer (float-parse, then truncate).
pub fn parse_tail_int(parameter: &str, reply: &str) -> RigResult<i64> {
    let value = parse_tail_f64(parameter, reply)?;
    if !value.is_finite() {
        return Err(RigError::unexpected(parameter, reply));
    }
    Ok(value.trunc() as i64)
}

/// Value of a `param=value` reply. The separator is mandatory.
pub fn parse_tagged<'a>(parameter: &str, reply: &'a str) -> RigResult<&'a str> {
    let (_, value) = reply
        .split_once('=')
        .ok_or_else(|| RigError::unexpected(parameter, reply))?;
    value
        .split_whitespace()
        .next()
        .ok_or_else(|| RigError::unexpected(parameter, reply))
}

/// Render a float the way the firmware expects: shortest form, always with a
/// decimal point (`10` -> `"10.0"`, `2.5` -> `"2.5"`).
pub fn format_float(value: f64) -> String {
    let text = value.to_string();
    if text.contains(['.', 'e', 'E']) || !value.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}

/// Sends commands to one device.
///
/// A codec is bound to a single [`DeviceHandle`] for its lifetime. It retries
/// transport failures according to its [`RetryPolicy`] and checks every reply
/// for the failure sentinel.
#[derive(Clone)]
pub struct Codec {
    transport: SharedTransport,
    handle: DeviceHandle,
    retry: RetryPolicy,
}

impl Codec {
    /// Bind to `handle`, with the default retry policy.
    pub fn new(transport: SharedTransport, handle: DeviceHandle) -> Self {
        Self {
            transport,
            handle,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy for transport failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Device this codec addresses.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Underlying shared transport.
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Whether `other` relays through the same transport instance.
    pub fn shares_transport(&self, other: &Codec) -> bool {
        Arc::ptr_eq(&self.transport, &other.transport)
    }

    /// Send without checking the reply.
    pub async fn send(&self, command: &str) -> RigResult<String> {
        let reply = self
            .retry
            .retry_transient(|| self.transport.send_command(&self.handle, command))
            .await?;
        trace!(device = %self.handle.label(), command, reply = %reply, "Reply");
        Ok(reply)
    }

    /// Send and fail on the sentinel.
    pub async fn execute(&self, command: &str) -> RigResult<String> {
        let reply = self.send(command).await?;
        check_failure(command, &reply)?;
        Ok(reply)
    }

    /// Send a query and parse the reply tail as a float.
    pub async fn query_f64(&self, command: &str) -> RigResult<f64> {
        let reply = self.execute(command).await?;
        parse_tail_f64(command, &reply)
    }

    /// Send a query and parse the reply tail as an integer.
    pub async fn query_int(&self, command: &str) -> RigResult<i64> {
        let reply = self.execute(command).await?;
        parse_tail_int(command, &reply)
    }

    /// Send a query and return the value of its `param=value` reply.
    pub async fn query_tagged(&self, command: &str, parameter: &str) -> RigResult<String> {
        let reply = self.execute(command).await?;
        parse_tagged(parameter, &reply).map(str::to_string)
    }

    /// Run `body` with the transport in batch mode, always leaving it again.
    pub async fn batch<T, F, Fut>(&self, body: F) -> RigResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = RigResult<T>>,
    {
        self.transport.begin_batch(&self.handle).await?;
        let result = body().await;
        let ended = self.transport.end_batch(&self.handle).await;
        let value = result?;
        ended?;
        Ok(value)
    }
}
