// src/commands/jobs.rs
//! Job queue status

use super::open_jobs;
use anyhow::Result;
use ferry::config::Config;
use ferry::daemon::DaemonLock;
use ferry::jobs::Job;

/// Show the daemon state, queued jobs and failed jobs
pub fn cmd_jobs(config: &Config, clear_failed: bool) -> Result<()> {
    let jobs = open_jobs(config)?;

    if clear_failed {
        let cleared = jobs.clear_failed()?;
        println!("Cleared {} failed jobs", cleared);
        return Ok(());
    }

    let lock_path = config.lock_path();
    if DaemonLock::is_held(&lock_path) {
        match DaemonLock::holder_pid(&lock_path) {
            Some(pid) => println!("ferryd is running (pid {})", pid),
            None => println!("ferryd is running"),
        }
    } else {
        println!("ferryd is not running");
    }

    let pending = jobs.pending_jobs()?;
    print_queue("Sequential", &pending.sequential);
    print_queue("Background", &pending.background);

    let failed = jobs.failed_jobs()?;
    if !failed.is_empty() {
        println!("Failed ({}):", failed.len());
        for job in failed {
            println!(
                "  [{}] {}#{} [{}]: {}",
                job.failed_at.format("%Y-%m-%d %H:%M:%S"),
                job.kind,
                job.queue_id,
                job.params.join(", "),
                job.error
            );
        }
    }
    Ok(())
}

fn print_queue(label: &str, jobs: &[Job]) {
    if jobs.is_empty() {
        println!("{}: idle", label);
        return;
    }
    println!("{} ({}):", label, jobs.len());
    for job in jobs {
        let state = if job.claimed { " (running)" } else { "" };
        println!("  {}{}", job, state);
    }
}
