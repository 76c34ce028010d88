//! Solution-status diagnostics sink and persisted record formats. Injected
//! as a collaborator rather than a process-wide singleton.

use crate::prelude::Epoch;
use crate::solution::{HwBiasDiagnostics, SatDiagnostics, Sol, TropoDiagnostics};

/// Appended to strictly by the epoch driver; never read back by the core.
pub trait SolutionStatusSink {
    fn write_pos(&mut self, week: u32, tow: f64, sol: &Sol);
    fn write_velacc(&mut self, week: u32, tow: f64, sol: &Sol);
    fn write_clk(&mut self, week: u32, tow: f64, sol: &Sol);
    fn write_sat(&mut self, week: u32, tow: f64, diag: &SatDiagnostics);
    fn write_iono(&mut self, week: u32, tow: f64, status: u32, diag: &SatDiagnostics);
    fn write_trop(&mut self, week: u32, tow: f64, status: u32, diag: &TropoDiagnostics);
    fn write_hwbias(&mut self, week: u32, tow: f64, status: u32, diag: &HwBiasDiagnostics);
}

/// Week/time-of-week decomposition used by the `$POS`/... record formats.
fn week_tow(epoch: Epoch) -> (u32, f64) {
    let total_s = epoch.to_gpst_seconds();
    let week = (total_s / (7.0 * 86400.0)).floor().max(0.0);
    let tow = total_s - week * 7.0 * 86400.0;
    (week as u32, tow)
}

/// Plain-text sink accumulating one line per record, matching the RINEX/RTK
/// solution-status file convention.
#[derive(Debug, Default)]
pub struct StringSink {
    pub buffer: String,
}

impl StringSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience entry point: writes every record type for one epoch.
    pub fn log_epoch(
        &mut self,
        sol: &Sol,
        sat_diagnostics: &[SatDiagnostics],
        trop_diagnostics: &[TropoDiagnostics],
        hwbias_diagnostics: &[HwBiasDiagnostics],
    ) {
        let (week, tow) = week_tow(sol.epoch);
        let status = sol.status as u8 as u32;
        self.write_pos(week, tow, sol);
        self.write_velacc(week, tow, sol);
        self.write_clk(week, tow, sol);
        for diag in sat_diagnostics {
            self.write_sat(week, tow, diag);
            self.write_iono(week, tow, status, diag);
        }
        for diag in trop_diagnostics {
            self.write_trop(week, tow, status, diag);
        }
        for diag in hwbias_diagnostics {
            self.write_hwbias(week, tow, status, diag);
        }
    }
}

impl SolutionStatusSink for StringSink {
    fn write_pos(&mut self, week: u32, tow: f64, sol: &Sol) {
        let xf = sol.rr_fixed.unwrap_or(sol.rr);
        self.buffer.push_str(&format!(
            "$POS,{},{:.3},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4}\n",
            week, tow, sol.status as u8 as u32, sol.rr.x, sol.rr.y, sol.rr.z, xf.x, xf.y, xf.z
        ));
    }

    fn write_velacc(&mut self, week: u32, tow: f64, sol: &Sol) {
        self.buffer.push_str(&format!(
            "$VELACC,{},{:.3},{},{:.4},{:.4},{:.4},0,0,0,{:.4},{:.4},{:.4},0,0,0\n",
            week, tow, sol.status as u8 as u32, sol.vv.x, sol.vv.y, sol.vv.z,
        ));
    }

    fn write_clk(&mut self, week: u32, tow: f64, sol: &Sol) {
        self.buffer.push_str(&format!(
            "$CLK,{},{:.3},{},{:.3},{:.3},{:.3},{:.3}\n",
            week,
            tow,
            sol.status as u8 as u32,
            sol.clk_ns[0],
            sol.clk_ns[1],
            sol.clk_ns[2],
            sol.clk_ns[3]
        ));
    }

    fn write_sat(&mut self, week: u32, tow: f64, diag: &SatDiagnostics) {
        self.buffer.push_str(&format!(
            "$SAT,{},{:.3},{},{},{:.2},{:.2},{:.4},{:.4},{},{:.1},{:?},{},{},{},{},{}\n",
            week,
            tow,
            diag.sv,
            diag.freq_index,
            diag.azimuth_deg,
            diag.elevation_deg,
            diag.resp_m,
            diag.resc_m,
            diag.vsat as u8,
            diag.snr_dbhz,
            diag.fix,
            diag.slip as u8,
            diag.lock,
            diag.outc,
            diag.slipc,
            diag.rejc,
        ));
    }

    fn write_iono(&mut self, week: u32, tow: f64, status: u32, diag: &SatDiagnostics) {
        self.buffer.push_str(&format!(
            "$ION,{},{:.3},{},{},{:.2},{:.2},{:.4},{}\n",
            week, tow, status, diag.sv, diag.azimuth_deg, diag.elevation_deg, diag.iono_m, diag.iono_fixed as u8
        ));
    }

    fn write_trop(&mut self, week: u32, tow: f64, status: u32, diag: &TropoDiagnostics) {
        self.buffer.push_str(&format!(
            "$TROP,{},{:.3},{},{},{:.4},{:.4}\n",
            week, tow, status, diag.receiver, diag.ztd_m, diag.ztd_fixed_m
        ));
    }

    fn write_hwbias(&mut self, week: u32, tow: f64, status: u32, diag: &HwBiasDiagnostics) {
        self.buffer.push_str(&format!(
            "$HWBIAS,{},{:.3},{},{},{:.4},{:.4}\n",
            week, tow, status, diag.freq_index, diag.bias_m, diag.bias_fixed_m
        ));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solution::SolutionStatus;

    #[test]
    fn writes_one_line_per_record() {
        let mut sink = StringSink::new();
        let sol = Sol::none(Epoch::default());
        sink.log_epoch(&sol, &[], &[], &[]);
        assert_eq!(sink.buffer.lines().count(), 3);
        assert!(sink.buffer.starts_with("$POS"));
        assert_eq!(sol.status, SolutionStatus::None);
    }

    #[test]
    fn sat_trop_and_hwbias_records_are_emitted_alongside_sat() {
        use crate::solution::{HwBiasDiagnostics, SatDiagnostics, TropoDiagnostics};
        use crate::prelude::{Constellation, Receiver, SV};

        let mut sink = StringSink::new();
        let sol = Sol::none(Epoch::default());
        let sat = SatDiagnostics {
            sv: SV::new(Constellation::GPS, 3),
            freq_index: 0,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            resp_m: 0.0,
            resc_m: 0.0,
            vsat: true,
            snr_dbhz: 0.0,
            fix: crate::ssat::FixStatus::None,
            slip: false,
            lock: 0,
            outc: 0,
            slipc: 0,
            rejc: 0,
            iono_m: 1.234,
            iono_fixed: true,
        };
        let trop = TropoDiagnostics { receiver: Receiver::Base, ztd_m: 0.21, ztd_fixed_m: 0.21 };
        let bias = HwBiasDiagnostics { freq_index: 0, bias_m: 0.05, bias_fixed_m: 0.05 };
        sink.log_epoch(&sol, &[sat], &[trop], &[bias]);

        assert_eq!(sink.buffer.lines().count(), 6);
        assert!(sink.buffer.contains("$SAT"));
        assert!(sink.buffer.contains("$ION") && sink.buffer.contains("1.2340"));
        assert!(sink.buffer.contains("$TROP") && sink.buffer.contains("base"));
        assert!(sink.buffer.contains("$HWBIAS"));
    }
}
