use std::{cell::Cell, fs, path::PathBuf, rc::Rc, time::Duration};

use collector_data::{
    query::{QueryError, RetryPolicy},
    sampler::{Sampler, SamplerConfig, SamplerError, Sleeper},
    slurm::{Accounting, JobId, JobTimes},
    telemetry::Telemetry,
};

const SACCT_HEADER: &str = "              Start                 End \n------------------- ------------------- \n";
const START: &str = "2024-01-01T00:00:03";
const END: &str = "2024-01-01T00:00:07";

/// Shared fake clock; every sleep moves it one tick forward.
#[derive(Clone, Default)]
struct Clock(Rc<Cell<u32>>);

impl Clock {
    fn starting_at(tick: u32) -> Self {
        Self(Rc::new(Cell::new(tick)))
    }

    fn now(&self) -> u32 {
        self.0.get()
    }
}

struct TickingSleeper {
    clock: Clock,
    slept: Vec<Duration>,
}

impl Sleeper for TickingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
        self.clock.0.set(self.clock.now() + 1);
    }
}

/// Reports the job started from `start_tick` on and ended from `end_tick` on.
struct ScriptedSacct {
    clock: Clock,
    start_tick: u32,
    end_tick: u32,
    calls: usize,
    /// Number of leading calls answered with an empty string.
    garbage_calls: usize,
}

impl ScriptedSacct {
    fn new(clock: &Clock, start_tick: u32, end_tick: u32) -> Self {
        Self {
            clock: clock.clone(),
            start_tick,
            end_tick,
            calls: 0,
            garbage_calls: 0,
        }
    }
}

impl Accounting for ScriptedSacct {
    fn job_times(&mut self, job_id: &JobId) -> Result<JobTimes, QueryError> {
        assert_eq!(job_id.as_str(), "4242");
        self.calls += 1;
        if self.calls <= self.garbage_calls {
            return Err(QueryError::Malformed {
                program: "sacct".into(),
                reason: "empty output".into(),
            });
        }
        let tick = self.clock.now();
        let start = if tick >= self.start_tick { START } else { "Unknown" };
        let end = if tick >= self.end_tick { END } else { "Unknown" };
        let text = format!("{SACCT_HEADER}{start:>19} {end:>19} \n");
        Ok(JobTimes::parse_sacct(text).expect("fixture is well formed"))
    }
}

/// Two devices, one row each per tick, stamped with the current tick.
struct ScriptedSmi {
    clock: Clock,
    ticks_seen: Vec<u32>,
}

impl Telemetry for ScriptedSmi {
    fn query(&mut self) -> Result<String, QueryError> {
        let tick = self.clock.now();
        self.ticks_seen.push(tick);
        Ok(format!(
            "timestamp, uuid, memory.used [MiB]\n\
             2024/01/01 00:00:{tick:02}.000, GPU-aaa, {} MiB\n\
             2024/01/01 00:00:{tick:02}.000, GPU-bbb, {} MiB\n",
            1000 + tick,
            2000 + tick
        ))
    }
}

fn config(outdir: PathBuf) -> SamplerConfig {
    SamplerConfig {
        job_id: JobId("4242".into()),
        outdir,
        timestep: Duration::from_secs(5),
        retry: RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(100),
        },
    }
}

#[test]
fn logs_only_while_job_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path().to_path_buf());
    let clock = Clock::starting_at(1);
    let mut sacct = ScriptedSacct::new(&clock, 3, 7);
    let mut smi = ScriptedSmi {
        clock: clock.clone(),
        ticks_seen: vec![],
    };
    let mut sleeper = TickingSleeper {
        clock: clock.clone(),
        slept: vec![],
    };

    let report = Sampler::new(&config, &mut sacct, &mut smi, &mut sleeper)
        .run()
        .expect("sampling succeeds");

    assert_eq!(report.waiting_polls, 3);
    assert_eq!(report.ticks, 5);
    assert_eq!(report.lines_written, 10);
    assert_eq!(report.log_path, dir.path().join("gpu.log"));
    assert_eq!(smi.ticks_seen, vec![3, 4, 5, 6, 7]);
    // 3 polls while waiting, one end check per logging tick
    assert_eq!(sacct.calls, 8);

    let two = Duration::from_secs(2);
    let five = Duration::from_secs(5);
    assert_eq!(sleeper.slept, vec![two, two, five, five, five, five]);

    let content = fs::read_to_string(&report.log_path).expect("log written");
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "# GPU memory log");
    assert_eq!(lines[1], "timestamp, uuid, memory.used [MiB]");
    assert_eq!(lines.len(), 2 + 10);
    for (i, tick) in (3..=7).enumerate() {
        assert_eq!(
            lines[2 + 2 * i],
            format!("2024/01/01 00:00:{tick:02}.000, GPU-aaa, {} MiB", 1000 + tick)
        );
        assert_eq!(
            lines[3 + 2 * i],
            format!("2024/01/01 00:00:{tick:02}.000, GPU-bbb, {} MiB", 2000 + tick)
        );
    }
    for line in &lines[2..] {
        assert_eq!(line.split(',').count(), 3);
    }
}

#[test]
fn already_running_job_starts_logging_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path().to_path_buf());
    let clock = Clock::starting_at(10);
    let mut sacct = ScriptedSacct::new(&clock, 0, 11);
    let mut smi = ScriptedSmi {
        clock: clock.clone(),
        ticks_seen: vec![],
    };
    let mut sleeper = TickingSleeper {
        clock: clock.clone(),
        slept: vec![],
    };

    let report = Sampler::new(&config, &mut sacct, &mut smi, &mut sleeper)
        .run()
        .expect("sampling succeeds");

    assert_eq!(report.waiting_polls, 1);
    assert_eq!(smi.ticks_seen, vec![10, 11]);
    assert_eq!(sleeper.slept, vec![Duration::from_secs(5)]);
}

#[test]
fn missing_outdir_fails_before_any_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path().join("nope"));
    let clock = Clock::starting_at(1);
    let mut sacct = ScriptedSacct::new(&clock, 0, 0);
    let mut smi = ScriptedSmi {
        clock: clock.clone(),
        ticks_seen: vec![],
    };
    let mut sleeper = TickingSleeper {
        clock,
        slept: vec![],
    };

    let result = Sampler::new(&config, &mut sacct, &mut smi, &mut sleeper).run();

    assert!(matches!(result, Err(SamplerError::MissingOutdir(path)) if path == dir.path().join("nope")));
    assert_eq!(sacct.calls, 0);
    assert!(smi.ticks_seen.is_empty());
}

#[test]
fn transient_accounting_failures_are_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path().to_path_buf());
    let clock = Clock::starting_at(1);
    let mut sacct = ScriptedSacct::new(&clock, 0, 0);
    sacct.garbage_calls = 2;
    let mut smi = ScriptedSmi {
        clock: clock.clone(),
        ticks_seen: vec![],
    };
    let mut sleeper = TickingSleeper {
        clock: clock.clone(),
        slept: vec![],
    };

    let report = Sampler::new(&config, &mut sacct, &mut smi, &mut sleeper)
        .run()
        .expect("third attempt succeeds");

    assert_eq!(report.ticks, 1);
    assert_eq!(
        sleeper.slept,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[test]
fn persistent_accounting_failures_are_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path().to_path_buf());
    let clock = Clock::starting_at(1);
    let mut sacct = ScriptedSacct::new(&clock, 0, 0);
    sacct.garbage_calls = usize::MAX;
    let mut smi = ScriptedSmi {
        clock: clock.clone(),
        ticks_seen: vec![],
    };
    let mut sleeper = TickingSleeper {
        clock,
        slept: vec![],
    };

    let result = Sampler::new(&config, &mut sacct, &mut smi, &mut sleeper).run();

    assert!(matches!(
        result,
        Err(SamplerError::Accounting {
            source: QueryError::Malformed { .. },
            ..
        })
    ));
    assert_eq!(sacct.calls, 3);
    assert!(smi.ticks_seen.is_empty());
    assert!(!dir.path().join("gpu.log").exists());
}
