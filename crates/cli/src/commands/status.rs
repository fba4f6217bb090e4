use crate::client::{AirgapperApiClient, check_status, format_http_error};
use crate::println;

pub async fn execute(client: AirgapperApiClient) -> Result<(), String> {
    let response = client.get("/admin/status").send().await.map_err(format_http_error)?;
    let response = check_status(response).await?;
    let status: airgapper_api::StatusWire = response.json().await.map_err(format_http_error)?;

    println!("airgapperd: {}", if status.running { "running" } else { "stopped" });
    println!("  base path:       {}", status.base_path);
    println!("  append-only:     {}", status.append_only);
    println!(
        "  policy:          {}",
        status.policy_id.as_deref().unwrap_or("none installed")
    );
    println!("  requests served: {}", status.request_count);
    println!("  bytes written:   {}", status.total_bytes);
    match status.disk_used_pct {
        Some(pct) => println!("  disk used:       {pct:.1}%"),
        None => println!("  disk used:       unknown"),
    }

    Ok(())
}
