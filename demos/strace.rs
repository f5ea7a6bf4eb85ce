use std::ops::ControlFlow;
use std::process::Command;

use anyhow::Result;
use structopt::StructOpt;
use tether::{Arch, Options, TraceConfig, TraceEvent, Tracee};

#[derive(StructOpt, Debug)]
struct Opt {
    /// Trace only the spawned process, not its descendants.
    #[structopt(long)]
    no_follow: bool,

    /// Only print syscall exits.
    #[structopt(short, long)]
    quiet: bool,

    /// Report `SECCOMP_RET_TRACE` stops.
    #[structopt(long)]
    seccomp: bool,

    /// Stop after this many events.
    #[structopt(short = "n", long)]
    limit: Option<usize>,

    #[structopt(min_values = 1)]
    argv: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::from_args();

    let mut cmd = Command::new(&opt.argv[0]);

    if let Some(args) = opt.argv.get(1..) {
        cmd.args(args);
    }

    let tracee = Tracee::spawn(Arch::host(), cmd, Options::empty())?;

    let mut config = TraceConfig::new();
    config.set_follow(!opt.no_follow);

    if opt.seccomp {
        config.set_options(config.options() | Options::PTRACE_O_TRACESECCOMP);
    }

    let mut seen = 0;

    config.run(tracee, |event, tracee| {
        match event {
            TraceEvent::Syscall(syscall) => {
                if !(opt.quiet && syscall.is_enter()) {
                    println!("[{}] {}", syscall.pid, syscall.render(&tracee.memory()));
                }
            },
            TraceEvent::Seccomp(seccomp) => {
                println!("[{}] {}", seccomp.pid, seccomp);
            },
        }

        seen += 1;

        match opt.limit {
            Some(limit) if seen >= limit => Ok(ControlFlow::Break(())),
            _ => Ok(ControlFlow::Continue(())),
        }
    })?;

    Ok(())
}
