use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::discretization::fields::names;
use crate::realm::Realm;

/// Write column data to a CSV file with headers
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[&str], data: &[Vec<f64>]) -> io::Result<()> {
    if !headers.is_empty() && !data.is_empty() && headers.len() != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Headers count ({}) doesn't match data columns ({})",
                headers.len(),
                data.len()
            ),
        ));
    }

    let mut file = File::create(path)?;

    writeln!(file, "{}", headers.join(","))?;

    let n_rows = data.iter().map(|col| col.len()).max().unwrap_or(0);

    for i in 0..n_rows {
        let row: Vec<String> = data
            .iter()
            .map(|col| col.get(i).map(|v| format!("{v:.15e}")).unwrap_or_default())
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }

    Ok(())
}

pub const NODAL_HEADERS: [&str; 9] = [
    "x",
    "y",
    "z",
    "global_id",
    "owner",
    "iblank",
    "temperature",
    "rhs",
    "diagonal",
];

/// One row per node: position, ownership, overset status, temperature and the
/// assembled rhs and diagonal of its row.
pub fn write_nodal_fields<P: AsRef<Path>>(path: P, realm: &Realm) -> io::Result<()> {
    let mesh = &realm.mesh;
    let n = mesh.num_nodes();
    let rhs = realm.global_rhs();
    let diagonal = realm.assembled_diagonal();
    let iblank = mesh.fields.int(names::IBLANK);
    let temperature = mesh.fields.real(names::TEMPERATURE);

    let mut columns = vec![Vec::with_capacity(n); NODAL_HEADERS.len()];
    for node in 0..n {
        let x = mesh.node_coordinates(node);
        let row = mesh.global_id(node) - 1;
        let values = [
            x[0],
            x[1],
            x[2],
            mesh.global_id(node) as f64,
            mesh.nodes[node].owner as f64,
            iblank.map_or(1.0, |f| *f.get(node, 0) as f64),
            temperature.map_or(0.0, |f| *f.get(node, 0)),
            rhs[row],
            diagonal[row],
        ];
        for (col, v) in columns.iter_mut().zip(values) {
            col.push(v);
        }
    }
    write_csv(path, &NODAL_HEADERS, &columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("columns.csv");
        let data = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0], vec![7.0, 8.0, 9.0]];

        write_csv(&path, &["x", "y", "z"], &data).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "x,y,z");
        assert_eq!(lines.len(), 4);
        assert!(lines[3].contains(",,"));
    }

    #[test]
    fn mismatched_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_csv(dir.path().join("bad.csv"), &["x"], &[vec![1.0], vec![2.0]])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
