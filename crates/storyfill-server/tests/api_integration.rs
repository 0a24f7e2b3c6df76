#[allow(dead_code)]
mod common;

use common::{
    TestServer, create_room, forest_values, get_json, join_room, list_prompts, post_json,
    start_room, submit_all, submit_prompt, test_config,
};
use storyfill_server::config::ServerConfig;

#[tokio::test]
async fn templates_are_listed_and_fetchable() {
    let server = TestServer::new().await;
    let (status, body) = get_json(&format!("{}/templates", server.base_url())).await;
    assert_eq!(status, 200);
    let templates = body.as_array().unwrap();
    assert_eq!(templates.len(), 6);
    assert!(templates.iter().any(|t| t["id"] == "t-forest-mishap"));

    let (status, body) = get_json(&format!("{}/templates/t-forest-mishap", server.base_url())).await;
    assert_eq!(status, 200);
    assert_eq!(body["slots"].as_array().unwrap().len(), 6);
    assert!(body["story"].as_str().unwrap().contains("{adjective}"));

    let (status, _) = get_json(&format!("{}/templates/t-nope", server.base_url())).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn create_join_and_snapshot_shape() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(!code.contains(['I', 'O', '0', '1']));
    assert_eq!(created["room_snapshot"]["room_state"], "LobbyOpen");
    assert_eq!(created["room_snapshot"]["players"][0]["is_host"], true);

    let joined = join_room(&server, code, "Blake").await;
    assert_ne!(joined["player_token"], created["player_token"]);
    let players = joined["room_snapshot"]["players"].as_array().unwrap();
    assert_eq!(players.len(), 2);
    assert_eq!(players[1]["display_name"], "Blake");
    assert_eq!(players[1]["is_host"], false);

    // state_version strictly increased between the two snapshots.
    assert!(
        joined["room_snapshot"]["state_version"].as_u64().unwrap()
            > created["room_snapshot"]["state_version"].as_u64().unwrap()
    );
}

#[tokio::test]
async fn join_unknown_room_is_404() {
    let server = TestServer::new().await;
    let (status, body) = post_json(
        &format!("{}/rooms/ZZZZZZ/join", server.base_url()),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn join_locked_room_is_403_with_hint() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap();
    let host_token = created["host_token"].as_str().unwrap();

    let (status, _) = post_json(
        &format!("{}/rooms/{code}:lock", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = post_json(
        &format!("{}/rooms/{code}/join", server.base_url()),
        serde_json::json!({ "display_name": "Late" }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "ROOM_LOCKED");

    // Unlock re-opens the lobby.
    let (status, _) = post_json(
        &format!("{}/rooms/{code}:unlock", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 200);
    join_room(&server, code, "Late").await;
}

#[tokio::test]
async fn join_full_room_is_409() {
    let mut config = test_config();
    config.rooms.max_players = 2;
    let server = TestServer::from_config(config).await;

    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap();
    join_room(&server, code, "Blake").await;

    let (status, body) = post_json(
        &format!("{}/rooms/{code}/join", server.base_url()),
        serde_json::json!({ "display_name": "Extra" }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "ROOM_FULL");
}

#[tokio::test]
async fn start_requires_quorum_template_and_host_token() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap();
    let host_token = created["host_token"].as_str().unwrap();

    // Solo start refused.
    let (status, body) = post_json(
        &format!("{}/rooms/{code}/start", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "STATE_CONFLICT");

    join_room(&server, code, "Blake").await;

    // Wrong token refused.
    let (status, body) = post_json(
        &format!("{}/rooms/{code}/start", server.base_url()),
        serde_json::json!({ "host_token": "bogus" }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "AUTH");

    // Player token is not a host token.
    let (status, _) = post_json(
        &format!("{}/rooms/{code}/start", server.base_url()),
        serde_json::json!({ "host_token": created["player_token"] }),
    )
    .await;
    assert_eq!(status, 403);

    let snapshot = start_room(&server, code, host_token).await;
    assert_eq!(snapshot["room_state"], "Prompting");

    // Starting twice conflicts.
    let (status, _) = post_json(
        &format!("{}/rooms/{code}/start", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn set_template_validates_and_updates() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap();
    let host_token = created["host_token"].as_str().unwrap();

    let (status, body) = post_json(
        &format!("{}/rooms/{code}:template", server.base_url()),
        serde_json::json!({ "host_token": host_token, "template_id": "t-made-up" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION");

    let (status, body) = post_json(
        &format!("{}/rooms/{code}:template", server.base_url()),
        serde_json::json!({ "host_token": host_token, "template_id": "t-space-diner" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["template_id"], "t-space-diner");
}

#[tokio::test]
async fn host_token_in_authorization_header_works() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap();
    let host_token = created["host_token"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/rooms/{code}:lock", server.base_url()))
        .bearer_auth(host_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["locked"], true);
}

#[tokio::test]
async fn submit_validation_boundaries() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let host_token = created["host_token"].as_str().unwrap();
    let host_id = created["player_id"].as_str().unwrap().to_string();
    let host_player_token = created["player_token"].as_str().unwrap().to_string();
    join_room(&server, &code, "Blake").await;
    let snapshot = start_room(&server, &code, host_token).await;
    let round_id = snapshot["round_id"].as_str().unwrap().to_string();

    let prompts = list_prompts(&server, &code, &round_id, &host_id, &host_player_token).await;
    let noun_prompt = prompts["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["slot_id"] != "sound")
        .expect("host holds at least one non-sound prompt")
        .clone();
    let prompt_id = noun_prompt["id"].as_str().unwrap();
    let slot_id = noun_prompt["slot_id"].as_str().unwrap();
    // Slot-specific max length (noun 40, adjective/sound 24, verb 30...).
    let max_len = match slot_id {
        "adjective" | "sound" => 24,
        "verb" => 30,
        _ => 40,
    };

    // One past the limit fails...
    let (status, body) = submit_prompt(
        &server,
        &code,
        &round_id,
        prompt_id,
        &host_id,
        &host_player_token,
        &"x".repeat(max_len + 1),
    )
    .await;
    assert_eq!(status, 400, "{body}");
    assert_eq!(body["code"], "VALIDATION");

    // ...empty fails, control characters fail, blocked terms fail...
    for bad in ["", "   ", "caf\u{e9}", "f u c k"] {
        let (status, _) = submit_prompt(
            &server,
            &code,
            &round_id,
            prompt_id,
            &host_id,
            &host_player_token,
            bad,
        )
        .await;
        assert_eq!(status, 400, "value {bad:?} should be rejected");
    }

    // ...exactly at the limit is accepted.
    let (status, body) = submit_prompt(
        &server,
        &code,
        &round_id,
        prompt_id,
        &host_id,
        &host_player_token,
        &"x".repeat(max_len),
    )
    .await;
    assert_eq!(status, 200, "{body}");
}

#[tokio::test]
async fn submit_idempotency_and_conflict() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let host_token = created["host_token"].as_str().unwrap();
    let host_id = created["player_id"].as_str().unwrap().to_string();
    let host_player_token = created["player_token"].as_str().unwrap().to_string();
    join_room(&server, &code, "Blake").await;
    let snapshot = start_room(&server, &code, host_token).await;
    let round_id = snapshot["round_id"].as_str().unwrap().to_string();

    let prompts = list_prompts(&server, &code, &round_id, &host_id, &host_player_token).await;
    let prompt_id = prompts["prompts"][0]["id"].as_str().unwrap();

    let (status, _) = submit_prompt(
        &server, &code, &round_id, prompt_id, &host_id, &host_player_token, "brave",
    )
    .await;
    assert_eq!(status, 200);

    // Identical repeat is accepted silently.
    let (status, _) = submit_prompt(
        &server, &code, &round_id, prompt_id, &host_id, &host_player_token, "brave",
    )
    .await;
    assert_eq!(status, 200);

    // A different value conflicts.
    let (status, body) = submit_prompt(
        &server, &code, &round_id, prompt_id, &host_id, &host_player_token, "timid",
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "STATE_CONFLICT");
}

#[tokio::test]
async fn submit_someone_elses_prompt_is_404() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let host_token = created["host_token"].as_str().unwrap();
    let guest = join_room(&server, &code, "Blake").await;
    let snapshot = start_room(&server, &code, host_token).await;
    let round_id = snapshot["round_id"].as_str().unwrap().to_string();

    let host_id = created["player_id"].as_str().unwrap().to_string();
    let host_player_token = created["player_token"].as_str().unwrap().to_string();
    let host_prompts = list_prompts(&server, &code, &round_id, &host_id, &host_player_token).await;
    let hosts_prompt = host_prompts["prompts"][0]["id"].as_str().unwrap();

    let (status, _) = submit_prompt(
        &server,
        &code,
        &round_id,
        hosts_prompt,
        guest["player_id"].as_str().unwrap(),
        guest["player_token"].as_str().unwrap(),
        "sneaky",
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn story_and_reveal_state_conflicts() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let host_token = created["host_token"].as_str().unwrap();
    join_room(&server, &code, "Blake").await;
    let snapshot = start_room(&server, &code, host_token).await;
    let round_id = snapshot["round_id"].as_str().unwrap().to_string();

    // Reveal before everyone submitted.
    let (status, body) = post_json(
        &format!("{}/rooms/{code}/reveal", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 409);
    assert!(body["detail"].as_str().unwrap().contains("submitted"));

    // Story before reveal.
    let (status, _) = get_json(&format!(
        "{}/rooms/{code}/rounds/{round_id}/story",
        server.base_url()
    ))
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn reconnect_returns_snapshot_and_prompts() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let host_token = created["host_token"].as_str().unwrap();
    let guest = join_room(&server, &code, "Blake").await;
    let guest_id = guest["player_id"].as_str().unwrap().to_string();
    let guest_token = guest["player_token"].as_str().unwrap().to_string();
    let snapshot = start_room(&server, &code, host_token).await;
    let round_id = snapshot["round_id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &format!(
            "{}/rooms/{code}/players/{guest_id}:reconnect",
            server.base_url()
        ),
        serde_json::json!({ "player_token": guest_token }),
    )
    .await;
    assert_eq!(status, 200);

    // Round-trip law: the snapshot names the player, and the prompt set
    // equals what the prompts endpoint reports for them.
    assert!(
        body["room_snapshot"]["players"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p["id"] == guest_id.as_str())
    );
    let reconnect_ids: Vec<&str> = body["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    let listed = list_prompts(&server, &code, &round_id, &guest_id, &guest_token).await;
    let listed_ids: Vec<&str> = listed["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(reconnect_ids, listed_ids);
    assert_eq!(reconnect_ids.len(), 3);

    // Wrong token on reconnect is refused.
    let (status, _) = post_json(
        &format!(
            "{}/rooms/{code}/players/{guest_id}:reconnect",
            server.base_url()
        ),
        serde_json::json!({ "player_token": "bogus" }),
    )
    .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn kick_removes_player_and_redeals_their_prompts() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let host_token = created["host_token"].as_str().unwrap();
    let guest = join_room(&server, &code, "Blake").await;
    let third = join_room(&server, &code, "Casey").await;
    let snapshot = start_room(&server, &code, host_token).await;
    let round_id = snapshot["round_id"].as_str().unwrap().to_string();

    let guest_id = guest["player_id"].as_str().unwrap();
    let (status, body) = post_json(
        &format!("{}/rooms/{code}/players/{guest_id}:kick", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(
        !body["players"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p["id"] == *guest_id)
    );

    // The kicked player's prompts were redealt immediately: totals hold.
    let (_, progress) = get_json(&format!(
        "{}/rooms/{code}/rounds/{round_id}/progress",
        server.base_url()
    ))
    .await;
    assert_eq!(progress["assigned_total"], 9);

    // The kicked player's credentials stop working.
    let (status, _) = post_json(
        &format!(
            "{}/rooms/{code}/players/{guest_id}:reconnect",
            server.base_url()
        ),
        serde_json::json!({ "player_token": guest["player_token"] }),
    )
    .await;
    assert_eq!(status, 404);

    // Remaining players can still finish the round.
    let host_id = created["player_id"].as_str().unwrap().to_string();
    let host_player_token = created["player_token"].as_str().unwrap().to_string();
    let third_id = third["player_id"].as_str().unwrap().to_string();
    let third_token = third["player_token"].as_str().unwrap().to_string();
    submit_all(
        &server,
        &code,
        &round_id,
        &[(host_id, host_player_token), (third_id, third_token)],
        &forest_values(),
    )
    .await;
    let (_, progress) = get_json(&format!(
        "{}/rooms/{code}/rounds/{round_id}/progress",
        server.base_url()
    ))
    .await;
    assert_eq!(progress["ready_to_reveal"], true);
}

#[tokio::test]
async fn create_room_rate_limit_returns_retry_after() {
    let mut config = test_config();
    config.limits.create_room = (2, 60);
    let server = TestServer::from_config(config).await;

    create_room(&server, "t-forest-mishap", "One").await;
    create_room(&server, "t-forest-mishap", "Two").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/rooms", server.base_url()))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 429);
    assert!(resp.headers().contains_key("retry-after"));
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn end_room_expires_it_for_subsequent_calls() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let host_token = created["host_token"].as_str().unwrap();

    let (status, _) = post_json(
        &format!("{}/rooms/{code}/end", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 200);

    // Inside the removal grace the room answers 410.
    let (status, body) = post_json(
        &format!("{}/rooms/{code}/join", server.base_url()),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 410);
    assert_eq!(body["code"], "EXPIRED");
}

#[tokio::test]
async fn health_reports_rooms() {
    let server = TestServer::new().await;
    create_room(&server, "t-forest-mishap", "Avery").await;
    let (status, body) = get_json(&format!("http://{}/health", server.addr)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rooms"]["active"], 1);
    assert_eq!(body["rooms"]["players"], 1);
}

#[tokio::test]
async fn host_snapshot_query_requires_host() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap();
    let host_token = created["host_token"].as_str().unwrap();

    let (status, body) = get_json(&format!(
        "{}/rooms/{code}:snapshot?host_token={host_token}",
        server.base_url()
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["room_code"], *code);

    let (status, _) = get_json(&format!(
        "{}/rooms/{code}:snapshot?host_token=bogus",
        server.base_url()
    ))
    .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn share_lookup_errors() {
    let server = TestServer::new().await;
    let (status, body) = get_json(&format!("{}/shares/doesnotexist", server.base_url())).await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn unknown_playback_job_is_404() {
    let server = TestServer::new().await;
    let (status, _) = post_json(
        &format!("{}/tts/jobs/tts_missing:playback", server.base_url()),
        serde_json::json!({ "action": "play" }),
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn leave_room_updates_roster() {
    let server = TestServer::new().await;
    let created = create_room(&server, "t-forest-mishap", "Avery").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let guest = join_room(&server, &code, "Blake").await;

    let (status, _) = post_json(
        &format!("{}/rooms/{code}/leave", server.base_url()),
        serde_json::json!({
            "player_id": guest["player_id"],
            "player_token": guest["player_token"],
        }),
    )
    .await;
    assert_eq!(status, 200);

    let host_token = created["host_token"].as_str().unwrap();
    let (_, snapshot) = get_json(&format!(
        "{}/rooms/{code}:snapshot?host_token={host_token}",
        server.base_url()
    ))
    .await;
    assert_eq!(snapshot["players"].as_array().unwrap().len(), 1);
}

// Ensures the default (untouched) config would behave the same way in the
// handlers; only the windows differ in tests.
#[tokio::test]
async fn default_config_limits_are_spec_values() {
    let config = ServerConfig::default();
    assert_eq!(config.limits.create_room, (10, 60));
    assert_eq!(config.limits.join_room, (30, 60));
    assert_eq!(config.limits.submit_prompt_burst, (1, 1));
    assert_eq!(config.limits.submit_prompt_sustained, (60, 60));
    assert_eq!(config.limits.request_narration, (3, 600));
}
