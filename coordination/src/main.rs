//! Command-line front end for the coordination core
//!
//! Every subcommand performs one operation against the persisted state and
//! prints the result as JSON on stdout. Logs and alerts go to stderr.
//!
//! # Usage
//!
//! ```bash
//! coordination queue add --description "prod outage" --priority critical
//! coordination lock request Dev-A --resource src/lib.rs --priority high
//! coordination vote cast VOTE-1A2B3C4D Architect-A approve --reasoning "sound"
//! coordination cosign request FEAT-7 Dev-A --from red --to green --loc 30 --checks-passed
//! coordination sweep --watch
//! ```
//!
//! Exit codes: 0 success, 1 validation or state failure, 2 hard failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

use priority_coordination::council::Proposal;
use priority_coordination::rollback::rollback_target;
use priority_coordination::{
    Agent, CoSignatureRequest, ConfigError, CoordinationConfig, CoordinationError, Coordinator,
    Decision, EscalationReason, Gate, LockSpec, LogNotifier, PriorityLevel, ReviewSample,
    RollbackRequest, StateBackend, Sweeper, SystemClock, WorkItem,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (defaults, then file, then COORD_* env, then flags)
    #[arg(long)]
    config: Option<PathBuf>,

    /// State directory (overrides COORD_STATE_DIR)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// State backend: memory, json or rocks (overrides COORD_BACKEND)
    #[arg(long)]
    backend: Option<StateBackend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Priority task queue
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Agents and their assignments
    #[command(subcommand)]
    Agent(AgentCommand),
    /// Exclusive write lock
    #[command(subcommand)]
    Lock(LockCommand),
    /// Council votes
    #[command(subcommand)]
    Vote(VoteCommand),
    /// Quality-gate rollbacks
    #[command(subcommand)]
    Rollback(RollbackCommand),
    /// Tertiary reviewer selection
    #[command(subcommand)]
    Review(ReviewCommand),
    /// Risk-tiered co-signatures
    #[command(subcommand)]
    Cosign(CosignCommand),
    /// Collusion checks and second-factor lockout
    #[command(subcommand)]
    Security(SecurityCommand),
    /// Apply elapsed deadlines
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl-C
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct ItemArgs {
    /// Item id (generated when omitted)
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    description: String,
    #[arg(long)]
    priority: PriorityLevel,
    /// Capability an agent must have to take the item
    #[arg(long)]
    capability: Option<String>,
}

impl ItemArgs {
    fn into_item(self) -> WorkItem {
        let item = match self.id {
            Some(id) => WorkItem::with_id(id, self.description, self.priority),
            None => WorkItem::new(self.description, self.priority),
        };
        match self.capability {
            Some(capability) => item.requiring(capability),
            None => item,
        }
    }
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// Append an item to its tier
    Add(ItemArgs),
    /// Pop the next item without assigning it
    Next,
    /// Pop the next item and assign it to the least-loaded capable agent
    Dispatch,
    /// Remove a queued item
    Cancel { id: String },
    /// Depth per tier and queued items
    Status,
}

#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// Register or update an agent
    Register {
        id: String,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
    /// Registered agents with their workloads
    List,
    /// Mark an assigned item done
    Complete { agent: String, item: String },
    /// Displace an agent's current item with more urgent work
    Preempt {
        agent: String,
        current_item: String,
        #[command(flatten)]
        incoming: ItemArgs,
    },
    /// Assignment audit trail
    Audit,
}

#[derive(ClapArgs, Debug)]
struct LockArgs {
    requester: String,
    #[arg(long = "resource", required = true)]
    resources: Vec<String>,
    #[arg(long)]
    priority: PriorityLevel,
    /// Estimated hold time in minutes
    #[arg(long, default_value_t = 30)]
    minutes: u32,
}

impl From<LockArgs> for LockSpec {
    fn from(args: LockArgs) -> Self {
        LockSpec::new(args.requester, args.resources, args.priority, args.minutes)
    }
}

#[derive(Subcommand, Debug)]
enum LockCommand {
    /// Acquire the lock or join the queue
    Request(LockArgs),
    /// Ask to preempt the current holder
    Preempt(LockArgs),
    /// Release the lock
    Release { requester: String },
    /// Leave the queue
    Withdraw { requester: String },
    /// Holder, queue and history
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReasonArg {
    TimeoutNoVotes,
    QuorumNotMet,
    TieUnresolved,
}

impl From<ReasonArg> for EscalationReason {
    fn from(reason: ReasonArg) -> Self {
        match reason {
            ReasonArg::TimeoutNoVotes => EscalationReason::TimeoutNoVotes,
            ReasonArg::QuorumNotMet => EscalationReason::QuorumNotMet,
            ReasonArg::TieUnresolved => EscalationReason::TieUnresolved,
        }
    }
}

#[derive(Subcommand, Debug)]
enum VoteCommand {
    /// Open a vote
    Initiate {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Cast a ballot
    Cast {
        vote_id: String,
        voter: String,
        decision: Decision,
        #[arg(long, default_value = "")]
        reasoning: String,
    },
    /// Evaluate quorum and majority
    Status {
        vote_id: String,
        /// Treat the voting deadline as passed
        #[arg(long, default_value_t = false)]
        timeout: bool,
    },
    /// Request a tie-break, or escalate an unbroken tie
    Tie {
        vote_id: String,
        #[arg(long, default_value_t = false)]
        timed_out: bool,
    },
    /// Hand a vote to the user
    Escalate { vote_id: String, reason: ReasonArg },
    /// Full vote record
    Show { vote_id: String },
    /// Every vote
    List,
}

#[derive(Subcommand, Debug)]
enum RollbackCommand {
    /// Send a feature back to an earlier gate
    Execute {
        #[arg(long)]
        feature: String,
        #[arg(long)]
        from: Gate,
        /// Explicit target; derived from --fix-loc when omitted
        #[arg(long)]
        to: Option<Gate>,
        /// Estimated size of the fix in lines of code
        #[arg(long, default_value_t = 0)]
        fix_loc: u32,
        #[arg(long)]
        reason: String,
        /// Librarian co-signed
        #[arg(long, default_value_t = false)]
        cosigned: bool,
        #[arg(long)]
        owner: String,
    },
    /// Audit trail
    History,
}

#[derive(Subcommand, Debug)]
enum ReviewCommand {
    /// Record a contribution to a feature
    Track {
        feature: String,
        role: String,
        #[arg(long, default_value = "")]
        contribution: String,
    },
    /// Pick an independent reviewer
    Select {
        author: String,
        peer: String,
        feature: String,
    },
}

#[derive(ClapArgs, Debug)]
struct CosignArgs {
    feature: String,
    requester: String,
    #[arg(long)]
    from: Gate,
    #[arg(long)]
    to: Gate,
    /// Changed file; repeatable
    #[arg(long = "file")]
    files: Vec<String>,
    /// Total lines of code changed
    #[arg(long, default_value_t = 0)]
    loc: u32,
    /// Emergency bypass instead of a gate transition
    #[arg(long, default_value_t = false)]
    emergency: bool,
    /// Sign-offs present, tests passing and security scan clean
    #[arg(long, default_value_t = false)]
    checks_passed: bool,
    /// Tests are not part of this gate
    #[arg(long, default_value_t = false)]
    no_tests: bool,
    /// Enforce the coverage threshold with this measured coverage
    #[arg(long)]
    coverage: Option<f64>,
}

impl From<CosignArgs> for CoSignatureRequest {
    fn from(args: CosignArgs) -> Self {
        let mut request =
            CoSignatureRequest::transition(args.feature, args.requester, args.from, args.to)
                .touching(args.files, args.loc);
        if args.emergency {
            request = request.emergency_bypass();
        }
        if args.checks_passed {
            request = request.checks_passed();
        }
        if let Some(coverage) = args.coverage {
            request = request.with_coverage(coverage);
        }
        request.requires_tests = !args.no_tests;
        request
    }
}

#[derive(Subcommand, Debug)]
enum CosignCommand {
    /// Classify a request and grant or queue it
    Request(CosignArgs),
    /// Librarian signs a pending request
    Approve { request_id: String, librarian: String },
    /// Grants, pending reviews and spot checks
    Ledger,
}

#[derive(Subcommand, Debug)]
enum SecurityCommand {
    /// Check an author/reviewer pair for collusion
    Collusion {
        author: String,
        reviewer: String,
        #[arg(long)]
        approvals: u32,
        #[arg(long)]
        reviews: u32,
        #[arg(long, default_value_t = false)]
        consecutive: bool,
    },
    /// Recorded collusion detections
    Detections,
    /// Record a second-factor attempt
    Attempt {
        user: String,
        #[arg(long, default_value_t = false)]
        success: bool,
    },
    /// Administrator reset of a user's failures
    Reset { user: String },
    /// A user's lockout status
    Status { user: String },
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<CoordinationConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinationConfig::from_toml_file(path)?,
        None => CoordinationConfig::default(),
    };
    config.apply_env(|name| std::env::var(name).ok())?;
    if let Some(dir) = &args.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let coordinator = Arc::new(
        Coordinator::open(&config, Arc::new(LogNotifier), SystemClock::shared())
            .context("Failed to open coordination state")?,
    );
    let c = coordinator.as_ref();

    match args.command {
        Command::Queue(cmd) => match cmd {
            QueueCommand::Add(item) => {
                let item = item.into_item();
                let id = item.id.clone();
                let depth = c.board.add_item(item)?;
                print(&serde_json::json!({ "id": id, "depth": depth }))
            }
            QueueCommand::Next => print(&c.board.next_item()?),
            QueueCommand::Dispatch => print(&c.board.dispatch_next()?),
            QueueCommand::Cancel { id } => print(&c.board.cancel_item(&id)?),
            QueueCommand::Status => print(&serde_json::json!({
                "summary": c.board.summary()?,
                "items": c.board.queued_items()?,
            })),
        },
        Command::Agent(cmd) => match cmd {
            AgentCommand::Register { id, capabilities } => {
                c.board.register_agent(Agent::new(id.clone(), capabilities))?;
                print(&c.board.agent(&id)?)
            }
            AgentCommand::List => {
                let agents: Vec<_> = c
                    .board
                    .agents()?
                    .into_iter()
                    .map(|a| serde_json::json!({ "workload": a.workload(), "agent": a }))
                    .collect();
                print(&agents)
            }
            AgentCommand::Complete { agent, item } => print(&c.board.complete(&agent, &item)?),
            AgentCommand::Preempt {
                agent,
                current_item,
                incoming,
            } => {
                let incoming = incoming.into_item();
                let outcome = c.board.preempt(&agent, &current_item, incoming.clone())?;
                if !outcome.decision.allowed {
                    c.board.add_item(incoming)?;
                }
                print(&outcome)
            }
            AgentCommand::Audit => print(&c.board.audit()?),
        },
        Command::Lock(cmd) => match cmd {
            LockCommand::Request(spec) => print(&c.lock.request(spec.into())?),
            LockCommand::Preempt(spec) => print(&c.lock.request_preemption(spec.into())?),
            LockCommand::Release { requester } => print(&c.lock.release(&requester)?),
            LockCommand::Withdraw { requester } => print(&c.lock.withdraw(&requester)?),
            LockCommand::Status => print(&c.lock.status()?),
        },
        Command::Vote(cmd) => match cmd {
            VoteCommand::Initiate { title, description } => {
                let vote_id = c.council.initiate(Proposal::new(title, description))?;
                print(&serde_json::json!({ "vote_id": vote_id }))
            }
            VoteCommand::Cast {
                vote_id,
                voter,
                decision,
                reasoning,
            } => print(&c.council.cast_vote(&vote_id, &voter, decision, &reasoning)?),
            VoteCommand::Status { vote_id, timeout } => {
                print(&c.council.check_status(&vote_id, timeout)?)
            }
            VoteCommand::Tie { vote_id, timed_out } => {
                print(&c.council.handle_tie(&vote_id, timed_out)?)
            }
            VoteCommand::Escalate { vote_id, reason } => {
                print(&c.council.escalate(&vote_id, reason.into())?)
            }
            VoteCommand::Show { vote_id } => print(&c.council.get(&vote_id)?),
            VoteCommand::List => print(&c.council.list()?),
        },
        Command::Rollback(cmd) => match cmd {
            RollbackCommand::Execute {
                feature,
                from,
                to,
                fix_loc,
                reason,
                cosigned,
                owner,
            } => print(&c.rollbacks.execute(RollbackRequest {
                feature_id: feature,
                current: from,
                target: to.unwrap_or_else(|| rollback_target(from, fix_loc)),
                reason,
                cosigned,
                owner,
            })?),
            RollbackCommand::History => print(&c.rollbacks.history()?),
        },
        Command::Review(cmd) => match cmd {
            ReviewCommand::Track {
                feature,
                role,
                contribution,
            } => {
                c.reviewers.track_participation(&feature, &role, &contribution)?;
                print(&c.reviewers.participants(&feature)?)
            }
            ReviewCommand::Select {
                author,
                peer,
                feature,
            } => print(&serde_json::json!({
                "reviewer": c.reviewers.select_independent(&author, &peer, &feature)?,
            })),
        },
        Command::Cosign(cmd) => match cmd {
            CosignCommand::Request(args) => print(&c.cosign.process(args.into())?),
            CosignCommand::Approve {
                request_id,
                librarian,
            } => print(&c.cosign.approve(&request_id, &librarian)?),
            CosignCommand::Ledger => print(&c.cosign.ledger()?),
        },
        Command::Security(cmd) => match cmd {
            SecurityCommand::Collusion {
                author,
                reviewer,
                approvals,
                reviews,
                consecutive,
            } => {
                let mut sample = ReviewSample::new(author, reviewer, approvals, reviews);
                sample.consecutive = consecutive;
                print(&c.collusion.check(&sample)?)
            }
            SecurityCommand::Detections => print(&c.collusion.detections()?),
            SecurityCommand::Attempt { user, success } => {
                print(&c.two_factor.record_attempt(&user, success)?)
            }
            SecurityCommand::Reset { user } => {
                c.two_factor.reset_failures(&user)?;
                print(&c.two_factor.status(&user)?)
            }
            SecurityCommand::Status { user } => print(&c.two_factor.status(&user)?),
        },
        Command::Sweep { watch: false } => print(&c.sweep(c.now())?),
        Command::Sweep { watch: true } => {
            let handle = Sweeper::new(coordinator.clone(), config.sweep_interval()).spawn();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            let sweeps = handle.shutdown().await;
            print(&serde_json::json!({ "sweeps": sweeps }))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<CoordinationError>() {
        return e.exit_code() as u8;
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return 1;
    }
    2
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "priority_coordination=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            match e.downcast_ref::<CoordinationError>() {
                Some(ce) => eprintln!("error[{}]: {:#}", ce.code(), e),
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::from(code)
        }
    }
}
