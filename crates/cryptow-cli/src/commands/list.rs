use super::{colorize_status, json_pretty, Failure, EXIT_SUCCESS};
use console::{pad_str, Alignment};
use cryptow_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let rows = engine.list_status()?;
    if json {
        println!("{}", json_pretty(&rows)?);
    } else if rows.is_empty() {
        println!(
            "No profiles found. Define profiles in {}.",
            engine.layout().profiles_file().display()
        );
    } else {
        println!("{:<20} {:<10} {:<8} MOUNT", "PROFILE", "STATUS", "PID");
        for row in &rows {
            let pid = row.pid.map_or_else(|| "-".to_owned(), |p| p.to_string());
            let mount = match &row.error {
                Some(error) => error.clone(),
                None if row.mount_dirs.is_empty() => "-".to_owned(),
                None => row
                    .mount_dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            let colored = colorize_status(row.status);
            let status = pad_str(&colored, 10, Alignment::Left, None);
            println!("{:<20} {status} {pid:<8} {mount}", row.name);
        }
    }
    Ok(EXIT_SUCCESS)
}
