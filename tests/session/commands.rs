use crate::common::{open_fixture_session, FakeTool, HookEvent, TestHooks};
use r2bridge::address::Addr;
use r2bridge::arch::TargetDescription;
use r2bridge::config::{Config, DisplayConfig};
use r2bridge::error::Error;
use r2bridge::session::Session;
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn test_session_open_preamble() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);

    assert_eq!(session.cmd("?e hello").unwrap(), "hello");

    let journal = tool.journal();
    assert_eq!(journal[0], "?V");
    assert_eq!(
        journal[1],
        "e anal.autoname=true; e anal.hasnext=true; e asm.anal=true; e anal.fcnprefix=sub"
    );
    assert_eq!(journal[2], "e scr.color=0; e scr.html=false; e scr.utf8=true;");
    assert_eq!(journal[3], "e cmd.pdc=?");
    assert_eq!(journal[4], "?e hello");

    assert_eq!(session.tool_version().unwrap().to_string(), "5.8.8");
}

#[test]
#[serial]
fn test_multiline_command_folded_to_one_line() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);

    session.cmd("?e a\n?e b").unwrap();

    let journal = tool.journal();
    assert_eq!(journal.last().unwrap(), "?e a;?e b");
}

#[test]
#[serial]
fn test_seek_is_requeried_and_tracked() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);

    assert_eq!(session.current_seek(), None);
    session.cmd("s 0x1000").unwrap();
    assert_eq!(session.current_seek(), Some(Addr::from(0x1000_u64)));

    let journal = tool.journal();
    let pos = journal.iter().position(|l| l == "s 0x1000").unwrap();
    assert_eq!(journal[pos + 1], "s");
}

#[test]
#[serial]
fn test_env_change_fires_hook() {
    let tool = FakeTool::install();
    let (session, events) = open_fixture_session(&tool);

    session.cmd("?e quiet").unwrap();
    assert!(events.try_recv().is_err());

    session.cmd("e scr.color=1").unwrap();
    assert!(matches!(
        events.recv_timeout(Duration::from_secs(5)).unwrap(),
        HookEvent::EnvChanged
    ));
}

#[test]
#[serial]
fn test_json_command_suppresses_markup() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);

    let env = session.list_env().unwrap();
    assert_eq!(env.get("asm.arch").unwrap(), "x86");
    assert_eq!(env.get("scr.color").unwrap(), 0);

    let journal = tool.journal();
    let pos = journal.iter().position(|l| l == "ej").unwrap();
    assert_eq!(journal[pos - 1], "e scr.html=0");
    // html stays off for a session not configured for markup
    assert!(!journal.contains(&"e scr.html=1".to_string()));
}

#[test]
#[serial]
fn test_json_command_restores_configured_markup() {
    let tool = FakeTool::install();
    let (hooks, _events) = TestHooks::new();
    let config = Config {
        display: DisplayConfig {
            color: 2,
            html: true,
            utf8: true,
        },
        ..tool.config()
    };
    let session = Session::builder("/bin/true")
        .with_config(config)
        .with_hook(hooks)
        .open()
        .unwrap();

    session.list_env().unwrap();

    let journal = tool.journal();
    let pos = journal.iter().position(|l| l == "ej").unwrap();
    assert_eq!(journal[pos - 1], "e scr.html=0");
    assert_eq!(journal[pos + 1], "e scr.html=1");
}

#[test]
#[serial]
fn test_json_command_tolerates_unstructured_output() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);

    assert!(session.cmdj("?e not json").unwrap().is_null());

    let functions: Vec<String> = session.cmdj_into("?e still not json").unwrap();
    assert!(functions.is_empty());
}

#[test]
#[serial]
fn test_profile_application() {
    let tool = FakeTool::install();
    let (session, events) = open_fixture_session(&tool);

    session
        .apply_profile(&TargetDescription::new("arm64", None, "linux"))
        .unwrap();

    assert!(tool
        .journal()
        .contains(&"e asm.arch=arm; e asm.bits=64; e asm.os=linux; e anal.arch=arm;".to_string()));
    assert!(matches!(
        events.recv_timeout(Duration::from_secs(5)).unwrap(),
        HookEvent::EnvChanged
    ));
}

#[test]
#[serial]
fn test_concurrent_callers_get_their_own_responses() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);
    let preamble = tool.journal().len();

    const CALLERS: usize = 8;
    const ROUNDS: usize = 20;

    std::thread::scope(|scope| {
        for caller in 0..CALLERS {
            let session = &session;
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let marker = format!("t{caller}-{round}");
                    let reply = session.cmd(&format!("?e {marker}")).unwrap();
                    assert_eq!(reply, marker);
                }
            });
        }
    });

    let journal = tool.journal();
    assert_eq!(journal.len(), preamble + CALLERS * ROUNDS);
    // one well formed command per line, no interleaved fragments
    assert!(journal[preamble..].iter().all(|l| l.starts_with("?e t")));
}

#[test]
#[serial]
fn test_closed_session_rejects_commands() {
    let tool = FakeTool::install();
    let (session, _events) = open_fixture_session(&tool);

    session.close();
    let journal_len = tool.journal().len();

    assert!(matches!(session.cmd("?e late"), Err(Error::Closed)));
    assert!(matches!(session.cmd_sync("s 0x10"), Err(Error::Closed)));
    assert_eq!(tool.journal().len(), journal_len);
}
