//! Typed façade over the `lxc` command line.
//!
//! [`LxcClient::call`] is the single entry point to the runtime. The typed
//! helpers build argument vectors for the handful of subcommands pstart uses
//! and decode their output through the adapters in [`types`].

pub mod types;

use pstart_common::{ContainerRef, FatalContext, GatewayCidr, PstartError, PstartResult};
use serde_yaml::Value;

use crate::runner::{RunOptions, RunResult, Runner};

pub use types::{
    InstanceConfig, InstanceInfo, InstanceStatus, NetworkConfig, NicDevice, ProfileConfig,
    ProfileDocument,
};

/// Structured output formats the client can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// YAML, the default for `show` subcommands.
    Yaml,
    /// JSON (`--format json` listings).
    Json,
}

/// How a single `lxc` invocation should be run and interpreted.
#[derive(Debug, Clone, Default)]
pub struct Call {
    /// Decode stdout in this format when the call succeeds.
    pub format: Option<OutputFormat>,
    /// Runner options (exit codes, stdin, capture).
    pub options: RunOptions,
    /// Turn a command failure into a fatal error with this message.
    pub failure_message: Option<String>,
}

impl Call {
    /// Plain call: exit code 0 expected, output captured, nothing decoded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode stdout as YAML.
    #[must_use]
    pub fn yaml(mut self) -> Self {
        self.format = Some(OutputFormat::Yaml);
        self
    }

    /// Decode stdout as JSON.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.format = Some(OutputFormat::Json);
        self
    }

    /// Accept any exit code.
    #[must_use]
    pub fn accept_any(mut self) -> Self {
        self.options = self.options.accept_any();
        self
    }

    /// Send `data` on stdin.
    #[must_use]
    pub fn input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.options = self.options.input(data);
        self
    }

    /// Attach stdin/stdout/stderr to the terminal.
    #[must_use]
    pub fn interactive(mut self) -> Self {
        self.options = self.options.interactive();
        self
    }

    /// Fail fatally with `message` if the command fails.
    #[must_use]
    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }
}

/// Result of [`LxcClient::call`].
#[derive(Debug, Clone, Default)]
pub struct CallOutput {
    /// Decoded stdout, present only for a successful structured call.
    pub output: Option<Value>,
    /// Raw stdout.
    pub stdout: Vec<u8>,
    /// Raw stderr.
    pub stderr: Vec<u8>,
    /// Process exit code.
    pub exit_code: i32,
}

impl CallOutput {
    /// Decoded output, or a decode error if there is none.
    ///
    /// # Errors
    ///
    /// Fails when the call was not structured or did not succeed.
    pub fn decoded(&self) -> PstartResult<&Value> {
        self.output
            .as_ref()
            .ok_or_else(|| PstartError::Decode("no structured output".to_string()))
    }
}

fn decode(format: OutputFormat, stdout: &[u8]) -> PstartResult<Value> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::from_slice(stdout)?,
        OutputFormat::Json => {
            let json: serde_json::Value = serde_json::from_slice(stdout)?;
            serde_yaml::to_value(json)?
        }
    })
}

/// Client for one `lxc` binary.
#[derive(Debug, Clone)]
pub struct LxcClient {
    runner: Runner,
    binary: String,
}

impl LxcClient {
    /// Client invoking `binary` through `runner`.
    #[must_use]
    pub fn new(runner: Runner, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    /// Run `lxc <args>` as described by `call`.
    ///
    /// # Errors
    ///
    /// Command failures propagate as [`PstartError::Command`], or as
    /// [`PstartError::Fatal`] when `call` carries a failure message. Decode
    /// failures propagate as [`PstartError::Decode`].
    pub fn call(&self, args: &[&str], call: Call) -> PstartResult<CallOutput> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.binary.clone());
        argv.extend(args.iter().map(ToString::to_string));

        let run = self.runner.run(&argv, &call.options);
        let RunResult {
            stdout,
            stderr,
            exit_code,
        } = match call.failure_message {
            Some(message) => run.or_fatal(|| message)?,
            None => run?,
        };

        let output = match call.format {
            Some(format) if exit_code == 0 => Some(decode(format, &stdout)?),
            _ => None,
        };

        Ok(CallOutput {
            output,
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Run state of an existing instance.
    ///
    /// # Errors
    ///
    /// [`PstartError::ContainerNotFound`] if `lxc info` fails.
    pub fn info(&self, container: &ContainerRef) -> PstartResult<InstanceInfo> {
        let target = container.to_string();
        let out = self.call(&["info", &target], Call::new().accept_any())?;
        if out.exit_code != 0 {
            tracing::debug!(
                container = %target,
                stderr = %String::from_utf8_lossy(&out.stderr).trim_end(),
                "lxc info failed"
            );
            return Err(PstartError::ContainerNotFound { container: target });
        }
        InstanceInfo::parse(&target, &String::from_utf8_lossy(&out.stdout))
    }

    /// Profiles applied to an instance.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc config show` fails; schema error if `profiles` is absent.
    pub fn instance_config(&self, container: &ContainerRef) -> PstartResult<InstanceConfig> {
        let target = container.to_string();
        let out = self.call(
            &["config", "show", &target],
            Call::new()
                .yaml()
                .fail_with(format!("Unable to read the configuration of {target}")),
        )?;
        InstanceConfig::from_yaml(&target, out.decoded()?)
    }

    /// Look up a network; `None` if the runtime does not know it.
    ///
    /// # Errors
    ///
    /// Decode and schema errors for a network that does exist.
    pub fn network_show(&self, network: &str) -> PstartResult<Option<NetworkConfig>> {
        let out = self.call(&["network", "show", network], Call::new().yaml().accept_any())?;
        match &out.output {
            Some(doc) => NetworkConfig::from_yaml(network, doc).map(Some),
            None => Ok(None),
        }
    }

    /// Create a bridged network with the given gateway.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc network create` fails.
    pub fn network_create(&self, network: &str, gateway: &GatewayCidr, nat: bool) -> PstartResult<()> {
        let address = format!("ipv4.address={gateway}");
        let nat = format!("ipv4.nat={nat}");
        self.call(
            &["network", "create", network, &address, &nat, "ipv6.address=none"],
            Call::new().fail_with(format!("Unable to create network {network}")),
        )?;
        Ok(())
    }

    /// Look up a profile; `None` if the runtime does not know it.
    ///
    /// # Errors
    ///
    /// Decode errors for a profile that does exist.
    pub fn profile_show(&self, profile: &str) -> PstartResult<Option<ProfileDocument>> {
        let out = self.call(&["profile", "show", profile], Call::new().yaml().accept_any())?;
        out.output
            .map(|doc| serde_yaml::from_value(doc).map_err(PstartError::from))
            .transpose()
    }

    /// Create an empty profile.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc profile create` fails.
    pub fn profile_create(&self, profile: &str) -> PstartResult<()> {
        self.call(
            &["profile", "create", profile],
            Call::new().fail_with(format!("Unable to create profile {profile}")),
        )?;
        Ok(())
    }

    /// Replace a profile's body.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc profile edit` fails.
    pub fn profile_edit(&self, profile: &str, doc: &ProfileDocument) -> PstartResult<()> {
        let body = serde_yaml::to_string(doc)?;
        self.call(
            &["profile", "edit", profile],
            Call::new()
                .input(body)
                .fail_with(format!("Unable to configure profile {profile}")),
        )?;
        Ok(())
    }

    /// Apply `profile` (unscoped name) to `container`.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc profile add` fails.
    pub fn profile_add(&self, container: &ContainerRef, profile: &str) -> PstartResult<()> {
        let target = container.to_string();
        self.call(
            &["profile", "add", &target, profile],
            Call::new().fail_with(format!("Unable to add profile {profile} to {target}")),
        )?;
        Ok(())
    }

    /// Remove `profile` (unscoped name) from `container`.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc profile remove` fails.
    pub fn profile_remove(&self, container: &ContainerRef, profile: &str) -> PstartResult<()> {
        let target = container.to_string();
        self.call(
            &["profile", "remove", &target, profile],
            Call::new().fail_with(format!("Unable to remove profile {profile} from {target}")),
        )?;
        Ok(())
    }

    /// Write `data` to `path` inside the container.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc file push` fails.
    pub fn file_push(
        &self,
        container: &ContainerRef,
        path: &str,
        data: &[u8],
        mode: u32,
        owner: (u32, u32),
    ) -> PstartResult<()> {
        let target = container.file_target(path);
        let uid = format!("--uid={}", owner.0);
        let gid = format!("--gid={}", owner.1);
        let mode = format!("--mode={mode:04o}");
        self.call(
            &["file", "push", &uid, &gid, &mode, "-", &target],
            Call::new()
                .input(data)
                .fail_with(format!("Unable to push {path} into {container}")),
        )?;
        Ok(())
    }

    /// Read `path` from inside the container.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc file pull` fails.
    pub fn file_pull(&self, container: &ContainerRef, path: &str) -> PstartResult<Vec<u8>> {
        let target = container.file_target(path);
        let out = self.call(
            &["file", "pull", &target, "-"],
            Call::new().fail_with(format!("Unable to pull {path} from {container}")),
        )?;
        Ok(out.stdout)
    }

    /// Start the instance.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc start` fails.
    pub fn start(&self, container: &ContainerRef) -> PstartResult<()> {
        let target = container.to_string();
        self.call(
            &["start", &target],
            Call::new().fail_with(format!("Unable to start {target}")),
        )?;
        Ok(())
    }

    /// Stop the instance.
    ///
    /// # Errors
    ///
    /// Fatal if `lxc stop` fails.
    pub fn stop(&self, container: &ContainerRef) -> PstartResult<()> {
        let target = container.to_string();
        self.call(
            &["stop", &target],
            Call::new().fail_with(format!("Unable to stop {target}")),
        )?;
        Ok(())
    }

    /// Run `command` in the container and require it to succeed.
    ///
    /// # Errors
    ///
    /// Fatal with `failure_message` if the command exits non-zero.
    pub fn exec_checked(
        &self,
        container: &ContainerRef,
        command: &[&str],
        failure_message: impl Into<String>,
    ) -> PstartResult<RunResult> {
        let target = container.to_string();
        let mut args = vec!["exec", target.as_str(), "--"];
        args.extend_from_slice(command);
        let out = self.call(&args, Call::new().fail_with(failure_message))?;
        Ok(RunResult {
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.exit_code,
        })
    }

    /// Run `command` in the container attached to the terminal.
    ///
    /// Returns the command's exit code; a non-zero code is not an error.
    ///
    /// # Errors
    ///
    /// Only if `lxc` itself cannot be spawned.
    pub fn exec_interactive(&self, container: &ContainerRef, command: &[String]) -> PstartResult<i32> {
        let target = container.to_string();
        let mut args = vec!["exec", target.as_str(), "--"];
        args.extend(command.iter().map(String::as_str));
        let out = self.call(&args, Call::new().interactive().accept_any())?;
        Ok(out.exit_code)
    }
}
