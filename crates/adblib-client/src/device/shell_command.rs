//! Shell command builder choosing the protocol from the device's features

use std::sync::Arc;
use std::time::Duration;

use adblib_core::prelude::*;
use adblib_core::{DeviceSelector, DeviceSelectorKind};

use crate::channel::AdbInputChannel;
use crate::host::services::features;
use crate::session::AdbSession;
use crate::tracker::{CacheKey, DeviceCache};

use super::collectors::{LegacyShellV2Adapter, ShellCollector, ShellV2Collector};
use super::shell::{ShellOptions, ShellStream};

/// Feature list reported by the device, memoized for its connected lifetime
const DEVICE_FEATURES: CacheKey<Arc<Vec<String>>> = CacheKey::new("adblib.device_features");

/// Wire protocol a [`ShellCommand`] runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellProtocol {
    ShellV2,
    Exec,
    Shell,
}

/// Builder for one shell invocation
///
/// Shell v2 is used when allowed and supported by the device. Otherwise the
/// command falls back to `exec:` (if allowed) and then to `shell:`. Legacy
/// protocols report an exit code of 0.
pub struct ShellCommand {
    session: AdbSession,
    device: DeviceSelector,
    command: String,
    options: ShellOptions,
    policy: ProtocolPolicy,
}

#[derive(Debug, Clone, Copy)]
struct ProtocolPolicy {
    allow_shell_v2: bool,
    allow_legacy_exec: bool,
    allow_legacy_shell: bool,
}

impl ProtocolPolicy {
    async fn select(&self, session: &AdbSession, device: &DeviceSelector) -> Result<ShellProtocol> {
        if self.allow_shell_v2 && device_supports(session, device, features::SHELL_V2).await? {
            return Ok(ShellProtocol::ShellV2);
        }
        if self.allow_legacy_exec {
            return Ok(ShellProtocol::Exec);
        }
        if self.allow_legacy_shell {
            return Ok(ShellProtocol::Shell);
        }
        Err(Error::protocol(format!(
            "No allowed shell protocol for {}",
            device
        )))
    }
}

async fn device_supports(session: &AdbSession, device: &DeviceSelector, feature: &str) -> Result<bool> {
    let cache = match device.kind() {
        DeviceSelectorKind::SerialNumber(serial) => session.device_cache(serial),
        _ => DeviceCache::no_op(),
    };
    let host = session.host_services()?;
    let device_features = cache
        .get_or_put_async(&DEVICE_FEATURES, || async {
            Ok::<_, Error>(Arc::new(host.features(device).await?))
        })
        .await?;
    Ok(device_features.iter().any(|f| f == feature))
}

impl ShellCommand {
    pub(crate) fn new(session: AdbSession, device: DeviceSelector, command: String) -> Self {
        let options = ShellOptions {
            buffer_size: session.config().shell_buffer_size,
            ..Default::default()
        };
        Self {
            session,
            device,
            command,
            options,
            policy: ProtocolPolicy {
                allow_shell_v2: true,
                allow_legacy_exec: false,
                allow_legacy_shell: true,
            },
        }
    }

    pub fn with_stdin(mut self, stdin: Box<dyn AdbInputChannel>) -> Self {
        self.options.stdin = Some(stdin);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = timeout;
        self
    }

    /// Fail once the command produces no output for `timeout`
    pub fn with_command_output_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_output_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.options.buffer_size = buffer_size;
        self
    }

    pub fn allow_shell_v2(mut self, allow: bool) -> Self {
        self.policy.allow_shell_v2 = allow;
        self
    }

    pub fn allow_legacy_exec(mut self, allow: bool) -> Self {
        self.policy.allow_legacy_exec = allow;
        self
    }

    pub fn allow_legacy_shell(mut self, allow: bool) -> Self {
        self.policy.allow_legacy_shell = allow;
        self
    }

    /// Protocol this command would run with
    pub async fn select_protocol(&self) -> Result<ShellProtocol> {
        self.policy.select(&self.session, &self.device).await
    }

    /// Run with a shell v2 collector
    pub async fn execute<C: ShellV2Collector>(self, collector: C) -> Result<ShellStream<C::Output>> {
        let ShellCommand {
            session,
            device,
            command,
            options,
            policy,
        } = self;
        let protocol = policy.select(&session, &device).await?;
        debug!("Running {:?} with {:?}", command, protocol);
        let services = session.device_services()?;
        let stream = match protocol {
            ShellProtocol::ShellV2 => services.shell_v2(&device, &command, collector, options),
            ShellProtocol::Exec => services.exec(
                &device,
                &command,
                LegacyShellV2Adapter::new(collector),
                options,
            ),
            ShellProtocol::Shell => services.shell(
                &device,
                &command,
                LegacyShellV2Adapter::new(collector),
                options,
            ),
        };
        Ok(stream)
    }

    /// Run with a legacy collector, over `exec:` if allowed, else `shell:`
    pub fn execute_legacy<C: ShellCollector>(self, collector: C) -> Result<ShellStream<C::Output>> {
        let services = self.session.device_services()?;
        if self.policy.allow_legacy_exec {
            Ok(services.exec(&self.device, &self.command, collector, self.options))
        } else if self.policy.allow_legacy_shell {
            Ok(services.shell(&self.device, &self.command, collector, self.options))
        } else {
            Err(Error::protocol(format!(
                "No allowed legacy shell protocol for {:?}",
                self.command
            )))
        }
    }
}
