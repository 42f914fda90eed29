use crate::convergence::GenerationRecord;
use crate::driver::InversionResult;
use crate::options::Policy;
use crate::population::EvaluatedCandidate;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct CsvWriter {
    w: BufWriter<File>,
}

impl CsvWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
        }
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self { w: BufWriter::new(f) })
    }

    pub fn write_history_header(&mut self) -> Result<()> {
        writeln!(
            self.w,
            "policy,generation,best_fitness,best_so_far,mean_fitness,diversity,mutation_rate,evaluations"
        )?;
        Ok(())
    }

    pub fn write_history_row(&mut self, r: &GenerationRecord) -> Result<()> {
        writeln!(
            self.w,
            "{},{},{:.6e},{:.6e},{:.6e},{:.6},{:.6},{}",
            r.policy,
            r.generation,
            r.best_fitness,
            r.best_so_far,
            r.mean_fitness,
            r.diversity,
            r.mutation_rate,
            r.evaluations
        )?;
        Ok(())
    }

    pub fn write_estimate_header(&mut self) -> Result<()> {
        writeln!(
            self.w,
            "policy,member,x,y,height,emission_rate,fitness,max_residual,rank,crowding,status"
        )?;
        Ok(())
    }

    pub fn write_estimate_row(&mut self, policy: Policy, member: usize, m: &EvaluatedCandidate) -> Result<()> {
        let s = m.candidate.source();
        let max_residual = m
            .objectives()
            .get(1)
            .map(|v| format!("{:.6e}", v))
            .unwrap_or_default();
        let crowding = if m.crowding_distance.is_infinite() {
            -1.0
        } else {
            m.crowding_distance
        };
        let status = if m.evaluation.is_penalized() { "penalized" } else { "scored" };
        writeln!(
            self.w,
            "{},{},{:.4},{:.4},{:.4},{:.6},{:.6e},{},{},{:.4},{}",
            policy,
            member,
            s.x,
            s.y,
            s.height,
            s.emission_rate,
            m.fitness(),
            max_residual,
            m.rank,
            crowding,
            status
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }
}

/// Convergence history of every result, one row per generation
pub fn write_history(path: impl AsRef<Path>, results: &[&InversionResult]) -> Result<()> {
    let mut w = CsvWriter::create(path)?;
    w.write_history_header()?;
    for result in results {
        for record in &result.history {
            w.write_history_row(record)?;
        }
    }
    w.flush()
}

/// Best estimate (or whole Pareto front) of every result
pub fn write_estimates(path: impl AsRef<Path>, results: &[&InversionResult]) -> Result<()> {
    let mut w = CsvWriter::create(path)?;
    w.write_estimate_header()?;
    for result in results {
        for (i, member) in result.best.members().iter().enumerate() {
            w.write_estimate_row(result.policy, i, member)?;
        }
    }
    w.flush()
}
