//! CPLEX LP rendering, for handing a model to an external MILP solver or
//! inspecting it by eye.

use std::fmt;
use std::io;

use itertools::Itertools;

use crate::model::{Model, VarId, VarKind};

pub struct LpFormat<'a>(pub &'a Model);

pub fn write_lp<W: io::Write>(model: &Model, out: &mut W) -> io::Result<()> {
    write!(out, "{}", LpFormat(model))
}

/// Expressions wrap onto continuation lines past this column, keeping every
/// line well inside the 510 character limit of LP readers.
const WRAP_COLUMN: usize = 200;

impl LpFormat<'_> {
    /// Writes ` t1 + t2 ...` starting at `column` and returns the column the
    /// last line ends at.
    fn write_terms(
        &self,
        f: &mut fmt::Formatter<'_>,
        mut column: usize,
        terms: &[(VarId, i64)],
    ) -> Result<usize, fmt::Error> {
        if terms.is_empty() {
            write!(f, " 0")?;
            return Ok(column + 2);
        }
        let variables = self.0.variables();
        for (idx, &(var, coeff)) in terms.iter().enumerate() {
            let name = &variables[var].name;
            let sign = if coeff < 0 { "-" } else { "+" };
            let magnitude = coeff.unsigned_abs();
            let term = match (idx, magnitude) {
                (0, 1) if coeff < 0 => format!("- {}", name),
                (0, 1) => name.to_string(),
                (0, _) if coeff < 0 => format!("- {} {}", magnitude, name),
                (0, _) => format!("{} {}", magnitude, name),
                (_, 1) => format!("{} {}", sign, name),
                (_, _) => format!("{} {} {}", sign, magnitude, name),
            };
            if idx > 0 && column + 1 + term.len() > WRAP_COLUMN {
                write!(f, "\n  ")?;
                column = 2;
            }
            write!(f, " {}", term)?;
            column += 1 + term.len();
        }
        Ok(column)
    }
}

impl fmt::Display for LpFormat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        writeln!(f, "\\ chunk placement model")?;
        writeln!(f, "Minimize")?;
        let label = " machines:";
        write!(f, "{}", label)?;
        self.write_terms(f, label.len(), model.objective())?;
        writeln!(f)?;

        writeln!(f, "Subject To")?;
        for constraint in model.constraints() {
            let label = format!(" {}:", constraint.name);
            write!(f, "{}", label)?;
            self.write_terms(f, label.len(), &constraint.terms)?;
            writeln!(f, " {} {}", constraint.sense.symbol(), constraint.rhs)?;
        }

        writeln!(f, "Bounds")?;
        for var in model.variables().iter().filter(|var| var.kind == VarKind::Integer) {
            writeln!(f, " {} <= {} <= {}", var.lower, var.name, var.upper)?;
        }

        for (section, kind) in [("Binaries", VarKind::Binary), ("Generals", VarKind::Integer)] {
            let names = model
                .variables()
                .iter()
                .filter(|var| var.kind == kind)
                .map(|var| var.name.as_str())
                .collect_vec();
            if names.is_empty() {
                continue;
            }
            writeln!(f, "{}", section)?;
            for line in names.chunks(8) {
                writeln!(f, " {}", line.join(" "))?;
            }
        }
        writeln!(f, "End")
    }
}
