use crate::output::{print_json, print_table};
use benchrun_core::status::RunStatus;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let Some(status) = RunStatus::load(root)? else {
        if json {
            return print_json(&serde_json::Value::Null);
        }
        println!("No run recorded yet.");
        return Ok(());
    };

    if json {
        return print_json(&status);
    }

    println!("Run:       {} ({})", status.run_id, status.protocol);
    println!("State:     {}", status.state);
    println!("Stage:     {}", status.stage.as_deref().unwrap_or("-"));
    if let Some(point) = &status.resume_point {
        println!("Resumed:   from '{point}'");
    }
    if let Some(reason) = &status.waiting_for {
        println!("Waiting:   {reason}");
    }
    if let Some(err) = &status.error {
        println!("Error:     {err}");
    }
    println!("Updated:   {}", status.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));

    if !status.consumables.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = status
            .consumables
            .iter()
            .map(|c| {
                vec![
                    c.pool.clone(),
                    format!("{}/{}", c.consumed, c.capacity),
                    c.next.clone().unwrap_or_else(|| "empty".to_string()),
                ]
            })
            .collect();
        print_table(&["POOL", "USED", "NEXT"], &rows);
    }
    Ok(())
}
