use crate::common::{open_fixture_session, prepared_tool, FakeTool, REGION_BASE};
use r2bridge::remote::dispatch;
use serial_test::serial;
use std::sync::Mutex;

#[test]
#[serial]
fn test_init_payload_applies_profile_without_reply() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);
    let replies: Mutex<Vec<Option<String>>> = Mutex::new(Vec::new());
    let recorder = |reply: Option<String>| replies.lock().unwrap().push(reply);

    assert!(dispatch(&session, "r2 init arm64 64 linux", &recorder));

    assert_eq!(
        tool.count_exact("e asm.arch=arm; e asm.bits=64; e asm.os=linux; e anal.arch=arm;"),
        1
    );
    assert!(replies.lock().unwrap().is_empty(), "init is not answered");
}

#[test]
#[serial]
fn test_raw_payload_runs_and_replies() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);
    let replies: Mutex<Vec<Option<String>>> = Mutex::new(Vec::new());
    let recorder = |reply: Option<String>| replies.lock().unwrap().push(reply);

    assert!(dispatch(&session, "r2 ?e hello", &recorder));

    assert_eq!(*replies.lock().unwrap(), vec![Some("hello".to_string())]);
}

#[test]
#[serial]
fn test_agent_seek_maps_before_replying() {
    let tool = prepared_tool();
    let (session, _events) = open_fixture_session(&tool);
    let replies: Mutex<Vec<Option<String>>> = Mutex::new(Vec::new());
    let recorder = |reply: Option<String>| replies.lock().unwrap().push(reply);

    let payload = format!("r2 s {:#x}", REGION_BASE + 0x10);
    assert!(dispatch(&session, &payload, &recorder));

    // the agent gets its reply only after the region is usable
    assert_eq!(tool.count_journaled("on "), 1);
    assert_eq!(tool.count_exact("afij"), 1);
    assert_eq!(replies.lock().unwrap().len(), 1);
}

#[test]
#[serial]
fn test_failed_command_reported_as_no_response() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);
    let replies: Mutex<Vec<Option<String>>> = Mutex::new(Vec::new());
    let recorder = |reply: Option<String>| replies.lock().unwrap().push(reply);

    session.close();
    assert!(dispatch(&session, "r2 ?e lost", &recorder));

    assert_eq!(*replies.lock().unwrap(), vec![None]);
}

#[test]
#[serial]
fn test_unrelated_payload_left_alone() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);
    let replies: Mutex<Vec<Option<String>>> = Mutex::new(Vec::new());
    let recorder = |reply: Option<String>| replies.lock().unwrap().push(reply);

    let journaled_before = tool.journal().len();
    assert!(!dispatch(&session, "frida ping", &recorder));
    assert!(!dispatch(&session, "r2", &recorder));

    assert!(replies.lock().unwrap().is_empty());
    assert_eq!(tool.journal().len(), journaled_before);
}
