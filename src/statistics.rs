use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::provider::ExecuteMode;

/// Per-factory connection statistics.
///
/// Times are accumulated in milliseconds; names match the keys returned by
/// [`ConnectionStatistics::to_map`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatistics {
    pub connection_time: u64,
    pub execution_time: u64,
    pub select_count: u64,
    pub select_rows: u64,
    pub idu_count: u64,
    pub idu_rows: u64,
    pub server_roundtrips: u64,
    pub sum_result_sets: u64,
    pub transactions: u64,
    pub unprepared_execs: u64,
    opened_at: Option<Instant>,
}

impl ConnectionStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_open(&mut self) {
        if self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
    }

    pub(crate) fn record_close(&mut self) {
        if let Some(opened) = self.opened_at.take() {
            self.connection_time += millis(opened.elapsed());
        }
    }

    pub(crate) fn record_transaction(&mut self) {
        self.transactions += 1;
        self.server_roundtrips += 1;
    }

    pub(crate) fn record_roundtrip(&mut self) {
        self.server_roundtrips += 1;
    }

    pub(crate) fn record_execute(
        &mut self,
        mode: ExecuteMode,
        elapsed: Duration,
        result_sets: usize,
        rows: u64,
    ) {
        self.execution_time += millis(elapsed);
        self.server_roundtrips += 1;
        self.unprepared_execs += 1;
        self.sum_result_sets += result_sets as u64;
        match mode {
            ExecuteMode::NonQuery => {
                self.idu_count += 1;
                self.idu_rows += rows;
            }
            ExecuteMode::Scalar | ExecuteMode::Reader => {
                self.select_count += 1;
                self.select_rows += rows;
            }
        }
    }

    /// Snapshot keyed by statistic name, counting an open connection's time so far.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<&'static str, u64> {
        let connection_time = self.connection_time
            + self.opened_at.map_or(0, |opened| millis(opened.elapsed()));
        BTreeMap::from([
            ("ConnectionTime", connection_time),
            ("ExecutionTime", self.execution_time),
            ("IduCount", self.idu_count),
            ("IduRows", self.idu_rows),
            ("SelectCount", self.select_count),
            ("SelectRows", self.select_rows),
            ("ServerRoundtrips", self.server_roundtrips),
            ("SumResultSets", self.sum_result_sets),
            ("Transactions", self.transactions),
            ("UnpreparedExecs", self.unprepared_execs),
        ])
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
