//! Launch sequences: bringing a debug session up for run, attach, core and
//! remote targets
//!
//! Each mode has a fixed step list. Services are recorded in a
//! [`ServiceRegistry`] as their step completes, so after a failure the caller
//! knows exactly what was brought up and must be torn down.

use crate::gdb::client::GdbClient;
use crate::gdb::commands::*;
use crate::gdb::config::{LaunchConfig, LaunchMode};
use crate::gdb::error::{GdbError, Result};
use crate::gdb::sequence::{Sequence, Step};
use crate::gdb::types::Breakpoint;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session services a launch brings up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    ControlChannel,
    RunControl,
    StepQueue,
    Memory,
    Modules,
    Stack,
    Expressions,
    SourceLookup,
    Breakpoints,
    BreakpointManager,
    Registers,
    Disassembly,
}

/// Services in the order they were started
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceRegistry {
    started: Vec<Service>,
}

impl ServiceRegistry {
    fn start(&mut self, service: Service) {
        debug!("Service started: {:?}", service);
        if !self.started.contains(&service) {
            self.started.push(service);
        }
    }

    pub fn started(&self) -> &[Service] {
        &self.started
    }

    pub fn is_started(&self, service: Service) -> bool {
        self.started.contains(&service)
    }
}

/// State threaded through the launch steps
pub struct LaunchContext {
    pub client: Arc<GdbClient>,
    pub config: LaunchConfig,
    pub services: ServiceRegistry,
    /// Breakpoints installed by the breakpoint manager, in request order
    pub breakpoints: Vec<Breakpoint>,
    pub gdb_banner: Option<String>,
    pub pid: Option<u32>,
}

impl LaunchContext {
    pub fn new(client: Arc<GdbClient>, config: LaunchConfig) -> Self {
        Self {
            client,
            config,
            services: ServiceRegistry::default(),
            breakpoints: Vec::new(),
            gdb_banner: None,
            pid: None,
        }
    }

    fn path(&self, path: &str) -> String {
        self.client.commands().translate_path(path)
    }

    fn program(&self) -> Result<&str> {
        self.config
            .program
            .as_deref()
            .ok_or_else(|| GdbError::Config("no program to load".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchStep {
    ControlChannel,
    LoadProgram,
    ProgramEnvironment,
    RunControl,
    /// Marks where the caller brings up its step queue; sends nothing.
    StepQueue,
    AttachProcess,
    LoadCore,
    ConnectRemote,
    /// Marks where the caller brings up its memory, module, stack and
    /// expression services; sends nothing.
    DataServices,
    SourceLookup,
    /// Marks where the caller brings up its breakpoint service; sends nothing.
    Breakpoints,
    BreakpointManager,
    /// Marks where the caller brings up its register and disassembly
    /// services; sends nothing.
    RegistersAndDisassembly,
    StartProgram,
    ResumeRemote,
}

impl LaunchStep {
    /// The fixed step order for a launch mode.
    pub fn for_mode(mode: &LaunchMode) -> Vec<LaunchStep> {
        use LaunchStep::*;
        match mode {
            LaunchMode::Run => vec![
                ControlChannel,
                LoadProgram,
                ProgramEnvironment,
                RunControl,
                StepQueue,
                DataServices,
                SourceLookup,
                Breakpoints,
                BreakpointManager,
                RegistersAndDisassembly,
                StartProgram,
            ],
            LaunchMode::Attach { .. } => vec![
                ControlChannel,
                LoadProgram,
                RunControl,
                StepQueue,
                AttachProcess,
                DataServices,
                SourceLookup,
                Breakpoints,
                BreakpointManager,
                RegistersAndDisassembly,
            ],
            LaunchMode::Core { .. } => vec![
                ControlChannel,
                LoadProgram,
                RunControl,
                StepQueue,
                LoadCore,
                DataServices,
                SourceLookup,
                Breakpoints,
                RegistersAndDisassembly,
            ],
            LaunchMode::Remote { .. } => vec![
                ControlChannel,
                LoadProgram,
                RunControl,
                StepQueue,
                ConnectRemote,
                DataServices,
                SourceLookup,
                Breakpoints,
                BreakpointManager,
                RegistersAndDisassembly,
                ResumeRemote,
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchStep::ControlChannel => "control-channel",
            LaunchStep::LoadProgram => "load-program",
            LaunchStep::ProgramEnvironment => "program-environment",
            LaunchStep::RunControl => "run-control",
            LaunchStep::StepQueue => "step-queue",
            LaunchStep::AttachProcess => "attach-process",
            LaunchStep::LoadCore => "load-core",
            LaunchStep::ConnectRemote => "connect-remote",
            LaunchStep::DataServices => "data-services",
            LaunchStep::SourceLookup => "source-lookup",
            LaunchStep::Breakpoints => "breakpoints",
            LaunchStep::BreakpointManager => "breakpoint-manager",
            LaunchStep::RegistersAndDisassembly => "registers-and-disassembly",
            LaunchStep::StartProgram => "start-program",
            LaunchStep::ResumeRemote => "resume-remote",
        }
    }
}

/// Temporary breakpoint at the entry symbol when the launch asks for one.
async fn break_at_entry(ctx: &LaunchContext) -> Result<()> {
    if ctx.config.stop_at_entry {
        let entry = BreakInsert::at(ctx.config.entry_symbol.clone()).temporary();
        let bp = ctx.client.execute(entry).await?;
        debug!("Entry breakpoint {} at {}", bp.number, ctx.config.entry_symbol);
    }
    Ok(())
}

#[async_trait]
impl Step<LaunchContext> for LaunchStep {
    fn name(&self) -> &str {
        self.as_str()
    }

    async fn execute(&self, ctx: &mut LaunchContext) -> Result<()> {
        let client = Arc::clone(&ctx.client);
        match self {
            LaunchStep::ControlChannel => {
                client.execute(GdbSet::new("pagination", "off")).await?;
                client.execute(GdbSet::new("confirm", "off")).await?;
                let banner = client.execute(GdbVersion).await?;
                ctx.gdb_banner = Some(banner.lines().next().unwrap_or_default().to_string());
                ctx.services.start(Service::ControlChannel);
            }
            LaunchStep::LoadProgram => {
                if ctx.config.program.is_some() {
                    let path = ctx.path(ctx.program()?);
                    client.execute(FileExecAndSymbols { path }).await?;
                }
            }
            LaunchStep::ProgramEnvironment => {
                if !ctx.config.arguments.is_empty() {
                    let arguments = ctx.config.arguments.clone();
                    client.execute(ExecArguments { arguments }).await?;
                }
                if let Some(dir) = &ctx.config.working_dir {
                    let directory = ctx.path(dir);
                    client.execute(EnvironmentCd { directory }).await?;
                }
            }
            LaunchStep::RunControl => {
                if ctx.config.non_stop {
                    client.execute(GdbSet::new("non-stop", "on")).await?;
                }
                ctx.services.start(Service::RunControl);
            }
            LaunchStep::StepQueue => ctx.services.start(Service::StepQueue),
            LaunchStep::AttachProcess => {
                if let LaunchMode::Attach { pid } = ctx.config.mode {
                    client.execute(TargetAttach { pid }).await?;
                    // the target is stopped after attaching
                    match client.execute(client.commands().info_pid()).await {
                        Ok(found) => ctx.pid = Some(found),
                        Err(e) => {
                            warn!("Could not confirm attached pid: {}", e);
                            ctx.pid = Some(pid);
                        }
                    }
                }
            }
            LaunchStep::LoadCore => {
                if let LaunchMode::Core { core_file } = &ctx.config.mode {
                    let core = ctx.path(core_file);
                    client.execute(TargetSelect::core(&core)).await?;
                }
            }
            LaunchStep::ConnectRemote => {
                if let LaunchMode::Remote { target } = &ctx.config.mode {
                    client.execute(TargetSelect::remote(target)).await?;
                }
            }
            LaunchStep::DataServices => {
                for service in [
                    Service::Memory,
                    Service::Modules,
                    Service::Stack,
                    Service::Expressions,
                ] {
                    ctx.services.start(service);
                }
            }
            LaunchStep::SourceLookup => {
                if !ctx.config.source_dirs.is_empty() {
                    let directories = ctx
                        .config
                        .source_dirs
                        .iter()
                        .map(|d| ctx.path(d))
                        .collect();
                    let search_path = client.execute(EnvironmentDirectory { directories }).await?;
                    debug!("Source search path: {:?}", search_path);
                }
                ctx.services.start(Service::SourceLookup);
            }
            LaunchStep::Breakpoints => ctx.services.start(Service::Breakpoints),
            LaunchStep::BreakpointManager => {
                for spec in ctx.config.breakpoints.clone() {
                    let bp = client
                        .execute(BreakInsert {
                            location: spec.location,
                            temporary: spec.temporary,
                            condition: spec.condition,
                        })
                        .await?;
                    ctx.breakpoints.push(bp);
                }
                info!("Installed {} breakpoint(s)", ctx.breakpoints.len());
                ctx.services.start(Service::BreakpointManager);
            }
            LaunchStep::RegistersAndDisassembly => {
                ctx.services.start(Service::Registers);
                ctx.services.start(Service::Disassembly);
            }
            LaunchStep::StartProgram => {
                break_at_entry(ctx).await?;
                client.execute(ExecRun).await?;
            }
            LaunchStep::ResumeRemote => {
                break_at_entry(ctx).await?;
                client.execute(ExecContinue).await?;
            }
        }
        Ok(())
    }
}

/// Run the launch sequence for `ctx.config.mode`. On failure `ctx` still
/// describes the partially started session.
pub async fn launch(ctx: &mut LaunchContext, cancel: &CancellationToken) -> Result<()> {
    let steps: Vec<Box<dyn Step<LaunchContext>>> = LaunchStep::for_mode(&ctx.config.mode)
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn Step<LaunchContext>>)
        .collect();
    let mut sequence = Sequence::new(steps);
    info!(
        session = %ctx.client.session_id(),
        steps = ?sequence.step_names(),
        "Launching"
    );
    sequence.run(ctx, cancel).await?;
    info!(session = %ctx.client.session_id(), "Launch complete");
    Ok(())
}
