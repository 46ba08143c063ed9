// SPDX-License-Identifier: Apache-2.0 OR MIT
// End-to-end scenarios through the public API: exact line schema, ordering,
// filtering, flush completeness and the lifecycle state machine.
//
// The subsystem is process-wide, so every test takes TEST_LOCK and tears
// the lifecycle down before releasing it.

use relaylog::{
    log_debug, log_info, log_output, log_warning, FilterRule, Level, Logger, State,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

static TEST_LOCK: Mutex<()> = Mutex::new(());
static SINK_COUNTER: AtomicU32 = AtomicU32::new(0);

fn serial() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Finalize on drop so a failing test does not leave the subsystem
/// initialized for the next one.
struct Teardown;

impl Drop for Teardown {
    fn drop(&mut self) {
        if relaylog::state() == State::Initialized {
            let _ = relaylog::finalize();
        }
    }
}

fn temp_sink(tag: &str) -> String {
    let n = SINK_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("relaylog_e2e_{tag}_{}_{n}.log", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

fn sink_lines(path: &str) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Lines produced by one specific logger, skipping the subsystem's own
/// records.
fn lines_of<'a>(lines: &'a [String], logger: &str) -> Vec<&'a String> {
    lines
        .iter()
        .filter(|line| line.split('|').nth(4) == Some(logger))
        .collect()
}

#[test]
fn s1_single_record_exact_schema() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("s1");

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("s1.logger");
    relaylog::log(
        &logger,
        Level::Info,
        "f.c",
        10,
        "fn",
        format_args!("hello"),
    )
    .unwrap();
    relaylog::flush().unwrap();
    relaylog::finalize().unwrap();

    let lines = sink_lines(&sink);
    assert_eq!(lines.len(), 1, "expected exactly one output line");

    let fields: Vec<&str> = lines[0].split('|').collect();
    assert_eq!(fields.len(), 6);
    assert_eq!(fields[0], "I");

    // YYYYMMDDTHHMMSS.NNNNNNNNN
    let stamp = fields[1];
    assert_eq!(stamp.len(), 25);
    assert_eq!(stamp.as_bytes()[8], b'T');
    assert_eq!(stamp.as_bytes()[15], b'.');
    assert!(stamp[16..].chars().all(|c| c.is_ascii_digit()));

    // PPPPP.TTTTT=RRRRR:prog
    let identity = fields[2];
    assert!(identity.ends_with(":prog"));
    assert!(identity.starts_with(&format!("{:05}.", std::process::id())));
    let rank = identity.split('=').nth(1).unwrap();
    assert!(rank.starts_with("00000:"), "default thread rank is 0");

    assert_eq!(fields[3], "f.c:10@fn");
    assert_eq!(fields[4], "s1.logger");
    assert_eq!(fields[5], "hello");

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn s2_multiline_message_shares_header() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("s2");

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("s2.logger");
    relaylog::log(&logger, Level::Info, "f.c", 10, "fn", format_args!("x\ny")).unwrap();
    relaylog::flush().unwrap();
    relaylog::finalize().unwrap();

    let lines = sink_lines(&sink);
    assert_eq!(lines.len(), 2);

    // Identical prefix up through the logger field, payloads x and y.
    let prefix = |line: &str| line.rsplit_once('|').unwrap().0.to_string();
    assert_eq!(prefix(&lines[0]), prefix(&lines[1]));
    assert!(lines[0].ends_with("|x"));
    assert!(lines[1].ends_with("|y"));

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn s3_two_producers_fifo_per_producer() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("s3");
    const PER_THREAD: usize = 10_000;

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("s3.logger");

    let spawn_producer = |rank: u16| {
        let logger = logger.clone();
        std::thread::spawn(move || {
            relaylog::set_thread_rank(rank);
            for seq in 0..PER_THREAD {
                log_info!(logger, "seq={seq}").unwrap();
            }
        })
    };
    let first = spawn_producer(1);
    let second = spawn_producer(2);
    first.join().unwrap();
    second.join().unwrap();

    relaylog::flush().unwrap();
    relaylog::finalize().unwrap();

    let lines = sink_lines(&sink);
    let records = lines_of(&lines, "s3.logger");
    assert_eq!(records.len(), 2 * PER_THREAD);

    for rank_tag in ["=00001:", "=00002:"] {
        let sequence: Vec<usize> = records
            .iter()
            .filter(|line| line.split('|').nth(2).unwrap().contains(rank_tag))
            .map(|line| {
                line.rsplit_once("seq=")
                    .unwrap()
                    .1
                    .parse::<usize>()
                    .unwrap()
            })
            .collect();
        assert_eq!(sequence.len(), PER_THREAD);
        // Per-producer FIFO: the subsequence appears in enqueue order.
        assert!(sequence.windows(2).all(|w| w[0] < w[1]));
    }

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn s4_prefix_filter_rules() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("s4");

    relaylog::init("prog", &sink).unwrap();
    let a = Logger::new("s4a.logger");
    let a_b = Logger::new("s4a.b.logger");
    let a_c = Logger::new("s4a.c.logger");

    relaylog::configure(&[
        FilterRule::new("", Level::Lowest),
        FilterRule::new("s4a", Level::Output),
        FilterRule::new("s4a.b", Level::Warning),
    ]);

    for logger in [&a, &a_b, &a_c] {
        log_warning!(logger, "warn record").unwrap();
        log_output!(logger, "output record").unwrap();
        log_debug!(logger, "debug record").unwrap();
    }
    relaylog::flush().unwrap();
    relaylog::finalize().unwrap();

    let lines = sink_lines(&sink);
    let payloads = |name: &str| -> Vec<String> {
        lines_of(&lines, name)
            .iter()
            .map(|line| line.rsplit_once('|').unwrap().1.to_string())
            .collect()
    };

    // Last matching rule wins: s4a.* capped at output, s4a.b.* at warning.
    assert_eq!(payloads("s4a.logger"), ["warn record", "output record"]);
    assert_eq!(payloads("s4a.b.logger"), ["warn record"]);
    assert_eq!(payloads("s4a.c.logger"), ["warn record", "output record"]);

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn s6_records_after_finalize_are_discarded() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("s6");

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("s6.logger");
    for i in 0..3 {
        log_info!(logger, "pre-exit {i}").unwrap();
    }
    relaylog::flush().unwrap();
    let before = sink_lines(&sink).len();
    relaylog::finalize().unwrap();

    // The exit already went through; further logging succeeds silently.
    log_info!(logger, "post-exit").unwrap();
    assert_eq!(sink_lines(&sink).len(), before);

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn flush_completeness() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("flush");
    const RECORDS: usize = 1_000;

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("flush.logger");
    for seq in 0..RECORDS {
        log_info!(logger, "record {seq}").unwrap();
    }
    relaylog::flush().unwrap();

    // Every record enqueued strictly before the flush is in the sink bytes.
    let lines = sink_lines(&sink);
    assert_eq!(lines_of(&lines, "flush.logger").len(), RECORDS);

    relaylog::finalize().unwrap();
    let _ = std::fs::remove_file(&sink);
}

#[test]
fn backpressure_never_drops() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("pressure");
    // Well past the data-channel capacity, issued as fast as one thread
    // can, so the blocking fallback has to engage.
    let records = 2 * relaylog::DATA_CHANNEL_CAPACITY;

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("pressure.logger");
    for seq in 0..records {
        log_info!(logger, "burst {seq}").unwrap();
    }
    relaylog::flush().unwrap();
    relaylog::finalize().unwrap();

    let lines = sink_lines(&sink);
    assert_eq!(lines_of(&lines, "pressure.logger").len(), records);

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn state_machine_rejects_bad_transitions() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("fsm");

    // finalize before any init is illegal.
    assert!(matches!(
        relaylog::finalize().unwrap_err().kind(),
        relaylog::ErrorKind::IllegalState { .. }
    ));

    relaylog::init("prog", &sink).unwrap();
    assert_eq!(relaylog::state(), State::Initialized);

    // init on top of init is illegal and leaves the subsystem working.
    assert!(matches!(
        relaylog::init("prog", &sink).unwrap_err().kind(),
        relaylog::ErrorKind::IllegalState { .. }
    ));
    let logger = Logger::new("fsm.logger");
    log_info!(logger, "still alive").unwrap();
    relaylog::flush().unwrap();

    relaylog::finalize().unwrap();
    assert_eq!(relaylog::state(), State::Finalized);
    assert!(matches!(
        relaylog::finalize().unwrap_err().kind(),
        relaylog::ErrorKind::IllegalState { .. }
    ));

    // flush is a no-op outside Initialized.
    relaylog::flush().unwrap();

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn reinit_cycles_accumulate_in_sink() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("cycles");
    let logger = Logger::new("cycles.logger");

    for cycle in 0..3 {
        relaylog::init("prog", &sink).unwrap();
        log_info!(logger, "cycle {cycle}").unwrap();
        relaylog::flush().unwrap();
        relaylog::finalize().unwrap();
    }

    let lines = sink_lines(&sink);
    let records = lines_of(&lines, "cycles.logger");
    assert_eq!(records.len(), 3);
    for (cycle, line) in records.iter().enumerate() {
        assert!(line.ends_with(&format!("cycle {cycle}")));
    }

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn oversized_message_grows_scratch_buffer() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("bigmsg");

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("bigmsg.logger");
    let big = "z".repeat(4096);
    log_info!(logger, "{big}").unwrap();
    log_info!(logger, "small again").unwrap();
    relaylog::flush().unwrap();
    relaylog::finalize().unwrap();

    let lines = sink_lines(&sink);
    let records = lines_of(&lines, "bigmsg.logger");
    assert_eq!(records.len(), 2);
    assert!(records[0].ends_with(&big));
    assert!(records[1].ends_with("small again"));

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn empty_message_yields_one_empty_line() {
    let _serial = serial();
    let _teardown = Teardown;
    let sink = temp_sink("empty");

    relaylog::init("prog", &sink).unwrap();
    let logger = Logger::new("empty.logger");
    log_info!(logger, "").unwrap();
    relaylog::flush().unwrap();
    relaylog::finalize().unwrap();

    let lines = sink_lines(&sink);
    let records = lines_of(&lines, "empty.logger");
    assert_eq!(records.len(), 1);
    assert!(records[0].ends_with("|empty.logger|"));

    let _ = std::fs::remove_file(&sink);
}

#[test]
fn init_with_bad_sink_path_fails_cleanly() {
    let _serial = serial();
    let _teardown = Teardown;

    let err = relaylog::init("prog", "/relaylog-no-such-dir/x.log").unwrap_err();
    assert!(matches!(err.kind(), relaylog::ErrorKind::Config(_)));

    // The failure left the state machine reusable.
    let sink = temp_sink("recover");
    relaylog::init("prog", &sink).unwrap();
    relaylog::finalize().unwrap();
    let _ = std::fs::remove_file(&sink);
}
