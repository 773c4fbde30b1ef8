use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::discretization::fields::names;
use crate::realm::{PassReport, Realm};

pub struct AssemblySummary {
    pub realm_name: String,

    // Mesh info
    pub num_nodes: usize,
    pub num_elements: usize,
    pub num_faces: usize,
    pub num_ranks: usize,
    /// Objects per rank for every part, sorted by part name.
    pub ownership: Vec<(String, Vec<usize>)>,
    pub inactive_nodes: usize,

    // Boundary conditions as (kind, name, target)
    pub boundary_conditions: Vec<(String, String, String)>,

    // Assembly info
    pub execution_space: &'static str,
    pub report: PassReport,
    pub rhs_sum: f64,
    pub rhs_norm: f64,
    pub diagonal_range: (f64, f64),
    pub max_row_sum: f64,
}

impl AssemblySummary {
    pub fn from_realm(realm: &Realm, report: PassReport) -> Self {
        let mesh = &realm.mesh;
        let mut ownership: Vec<(String, Vec<usize>)> =
            mesh.ownership_summary().into_iter().collect();
        ownership.sort_by(|a, b| a.0.cmp(&b.0));

        let inactive_nodes = mesh
            .fields
            .int(names::IBLANK)
            .map_or(0, |f| f.values().iter().filter(|&&v| v <= 0).count());

        let boundary_conditions = realm
            .bcs
            .iter()
            .map(|bc| (bc.kind().to_string(), bc.name().to_string(), bc.target().to_string()))
            .collect();

        let rhs = realm.global_rhs();
        let diag = realm.assembled_diagonal();
        let diag_min = diag.iter().cloned().fold(f64::INFINITY, f64::min);
        let diag_max = diag.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let max_row_sum = realm.row_sums().amax();

        Self {
            realm_name: realm.name.clone(),
            num_nodes: mesh.num_nodes(),
            num_elements: mesh.elements.len(),
            num_faces: mesh.faces.len(),
            num_ranks: mesh.num_ranks,
            ownership,
            inactive_nodes,
            boundary_conditions,
            execution_space: realm.options().execution_space.name(),
            report,
            rhs_sum: rhs.sum(),
            rhs_norm: rhs.norm(),
            diagonal_range: (diag_min, diag_max),
            max_row_sum,
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;

        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file, "CVFEM ASSEMBLY SUMMARY: {}", self.realm_name)?;
        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file)?;

        writeln!(file, "MESH STATISTICS")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Number of nodes:     {}", self.num_nodes)?;
        writeln!(file, "Number of elements:  {}", self.num_elements)?;
        writeln!(file, "Number of faces:     {}", self.num_faces)?;
        writeln!(file, "Number of ranks:     {}", self.num_ranks)?;
        writeln!(file, "Inactive nodes:      {}", self.inactive_nodes)?;
        writeln!(file)?;

        writeln!(file, "OWNERSHIP (objects per rank)")?;
        writeln!(file, "{}", "-".repeat(60))?;
        for (part, counts) in &self.ownership {
            writeln!(file, "{:<20} {:?}", part, counts)?;
        }
        writeln!(file)?;

        if !self.boundary_conditions.is_empty() {
            writeln!(file, "BOUNDARY CONDITIONS")?;
            writeln!(file, "{}", "-".repeat(60))?;
            for (kind, name, target) in &self.boundary_conditions {
                writeln!(file, "{:<13} {:<20} {}", kind, name, target)?;
            }
            writeln!(file)?;
        }

        writeln!(file, "ASSEMBLY")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Execution space:     {}", self.execution_space)?;
        writeln!(file, "Owned rows:          {}", self.report.rows)?;
        writeln!(file, "Nonzeros:            {}", self.report.nonzeros)?;
        writeln!(file, "Shared rows routed:  {}", self.report.shared_routed)?;
        writeln!(file, "Rhs sum:             {:.6e}", self.rhs_sum)?;
        writeln!(file, "Rhs norm:            {:.6e}", self.rhs_norm)?;
        writeln!(
            file,
            "Diagonal range:      {:.6e} to {:.6e}",
            self.diagonal_range.0, self.diagonal_range.1
        )?;
        writeln!(file, "Max |row sum|:       {:.6e}", self.max_row_sum)?;
        writeln!(file)?;

        writeln!(file, "{}", "=".repeat(60))?;

        Ok(())
    }

    pub fn print_to_console(&self) {
        println!("\n{}", "=".repeat(60));
        println!("ASSEMBLY SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Mesh:          {} elements, {} nodes, {} ranks",
            self.num_elements, self.num_nodes, self.num_ranks
        );
        println!(
            "System:        {} rows, {} nonzeros ({})",
            self.report.rows, self.report.nonzeros, self.execution_space
        );
        println!("Rhs sum:       {:.6e}", self.rhs_sum);
        if self.inactive_nodes > 0 {
            println!("Overset:       {} inactive nodes", self.inactive_nodes);
        }
        println!("{}\n", "=".repeat(60));
    }
}
