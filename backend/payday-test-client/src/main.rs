// src/main.rs

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct ScheduleResponse {
    id: String,
    company_id: String,
    release_offset_days: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    schedule_id: String,
    generated: usize,
    inserted: usize,
}

#[derive(Debug, Deserialize)]
struct TransitionResponse {
    period: PeriodView,
}

#[derive(Debug, Deserialize)]
struct PeriodView {
    id: String,
    status: String,
    start_date: String,
    end_date: String,
    release_date: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = "http://localhost:3000";
    let client = Client::new();

    // Test 1: Status page
    println!("\n🔍 Testing status endpoint...");
    let status_response = client.get(format!("{}/status", base_url)).send().await?;
    println!("Status endpoint status: {}", status_response.status());

    // Test 2: Create a semimonthly schedule
    println!("\n🔍 Creating a semimonthly schedule...");
    let schedule = client
        .post(format!("{}/api/schedules", base_url))
        .json(&json!({
            "company_id": "default",
            "kind": "SEMIMONTHLY",
            "first_cutoff_day": 10,
            "last_cutoff_day": 25,
            "release_offset_days": 5
        }))
        .send()
        .await?
        .json::<ScheduleResponse>()
        .await?;
    println!("Created schedule: {:?}", schedule);

    // Test 3: Generate and sync periods for it
    println!("\n🔍 Generating periods...");
    let generated = client
        .post(format!(
            "{}/api/schedules/{}/periods/generate",
            base_url, schedule.id
        ))
        .json(&json!({ "count": 6 }))
        .send()
        .await?
        .json::<GenerateResponse>()
        .await?;
    println!("Generation result: {:?}", generated);

    // Test 4: Re-run generation; the second pass must insert nothing
    println!("\n🔍 Re-running generation to verify idempotence...");
    let regenerated = client
        .post(format!(
            "{}/api/schedules/{}/periods/generate",
            base_url, schedule.id
        ))
        .json(&json!({ "count": 6 }))
        .send()
        .await?
        .json::<GenerateResponse>()
        .await?;
    println!(
        "Second pass inserted {} rows (expected 0)",
        regenerated.inserted
    );

    // Test 5: Exercise an invalid transition; the API should reject it
    println!("\n🔍 Testing an invalid transition...");
    let period_id = prompt_for_period_id()?;
    if !period_id.is_empty() {
        let response = client
            .post(format!("{}/api/periods/{}/transition", base_url, period_id))
            .json(&json!({
                "action": "post",
                "actor_id": "tester"
            }))
            .send()
            .await?;
        println!("Posting from TIMEKEEPING status: {}", response.status());
        println!("Body: {}", response.text().await?);

        // Walk the happy path up to PROCESSED
        for action in ["finalizeTimekeeping", "submit"] {
            let response = client
                .post(format!("{}/api/periods/{}/transition", base_url, period_id))
                .json(&json!({ "action": action, "actor_id": "tester" }))
                .send()
                .await?;
            if response.status().is_success() {
                let transition = response.json::<TransitionResponse>().await?;
                println!("{} -> {:?}", action, transition.period);
            } else {
                println!("{} failed: {}", action, response.text().await?);
            }
        }

        // Totals snapshot
        let totals_response = client
            .get(format!("{}/api/periods/{}/totals", base_url, period_id))
            .send()
            .await?;
        println!("Totals: {}", totals_response.text().await?);
    }

    println!("\n✅ Testing complete!");

    Ok(())
}

fn prompt_for_period_id() -> Result<String, Box<dyn Error>> {
    println!("Enter a period id to exercise transitions (press Enter to skip):");
    let mut period_id = String::new();
    std::io::stdin().read_line(&mut period_id)?;
    Ok(period_id.trim().to_string())
}
