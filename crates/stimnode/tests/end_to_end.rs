//! Full node over TCP: operator socket in, acquisition requests out.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use boothconf::DevicesConfig;
use boothproto::{AcquisitionRequest, Collection, DeviceKind, DeviceRequirement, TaskDescriptor};
use common::{fast_timing, temp_store};
use pretty_assertions::assert_eq;
use serde_json::json;
use stimnode::{
    ControllerParts, HeadlessSurface, LoopbackOpener, OperatorFeed, OutletHub, TaskCatalog,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// Acquisition stand-in: logs every request, acks starts.
async fn acquisition_service() -> (String, Arc<Mutex<Vec<AcquisitionRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut text = String::new();
            if socket.read_to_string(&mut text).await.is_err() {
                continue;
            }
            let Some(request) = AcquisitionRequest::parse(&text) else {
                continue;
            };
            if request.expects_ack() {
                let _ = socket.write_all(b"ACQ ready").await;
            }
            log.lock().unwrap().push(request);
        }
    });
    (addr, seen)
}

fn collection() -> Collection {
    let timed = |task_id: &str, obs_id: &str, device: DeviceRequirement| {
        TaskDescriptor::new(task_id, obs_id)
            .with_kwarg("runner", json!("timed"))
            .with_kwarg("duration", json!(0))
            .with_device(device)
    };
    Collection::new("collA")
        .with_task(timed(
            "task1",
            "obs1",
            DeviceRequirement::new("Marker", DeviceKind::Marker),
        ))
        .with_task(timed(
            "task2",
            "obs2",
            DeviceRequirement::new("Microphone", DeviceKind::Microphone),
        ))
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

struct Operator {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Operator {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn next_line(&mut self) -> String {
        tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("no line from node")
            .unwrap()
            .expect("node closed the connection")
    }

    /// Read until a line equal to `wanted`, returning everything before it.
    async fn until(&mut self, wanted: &str) -> Vec<String> {
        let mut seen = Vec::new();
        loop {
            let line = self.next_line().await;
            if line == wanted {
                return seen;
            }
            seen.push(line);
        }
    }
}

#[tokio::test]
async fn test_operator_session_over_tcp() {
    let (acq_addr, acq_requests) = acquisition_service().await;
    let (dir, store) = temp_store();
    store.register_collection(&collection()).unwrap();

    let parts = ControllerParts {
        store: store.clone(),
        recorder: Arc::new(stimnode::AcquisitionClient::new(
            acq_addr,
            Duration::from_secs(2),
        )),
        opener: Arc::new(LoopbackOpener::new(
            Arc::new(OutletHub::new()),
            DevicesConfig::default(),
        )),
        catalog: TaskCatalog::with_builtins(),
        surface: Box::new(HeadlessSurface),
        feed: OperatorFeed::new(),
        data_out: dir.path().join("data"),
        timing: fast_timing(),
        shutdown: CancellationToken::new(),
    };
    let node = stimnode::start("127.0.0.1:0", parts).await.unwrap();
    let mut op = Operator::connect(node.local_addr()).await;

    op.send(r#"prepare:collA:{"study_id-date": "s01_2026-10-19"}"#)
        .await;
    let before_connect = op.until("UPDATOR:-Connect-").await;
    let outlets = before_connect
        .iter()
        .filter(|l| l.starts_with("-OUTLETID-:"))
        .count();
    assert_eq!(outlets, 2);

    op.send("present:task1-task2:sub1").await;
    let during = op.until("Finished task:task2").await;
    assert!(during.iter().any(|l| l == "Finished task:task1"));

    // The last stop request and row fill land just after the feed line.
    eventually(|| acq_requests.lock().unwrap().len() == 4).await;
    eventually(|| store.unfilled_rows("sub1").unwrap().is_empty()).await;
    let rows = store.log_rows("sub1").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1.task_id, "task1");
    assert_eq!(rows[1].1.tech_obs_id, "obs2");

    let requests = acq_requests.lock().unwrap().clone();
    let shape: Vec<String> = requests
        .iter()
        .map(|r| match r {
            AcquisitionRequest::RecordStart { task_id, .. } => format!("start:{task_id}"),
            AcquisitionRequest::RecordStop => "stop".to_string(),
        })
        .collect();
    assert_eq!(shape, vec!["start:task1", "stop", "start:task2", "stop"]);
    let AcquisitionRequest::RecordStart { output_path, .. } = &requests[0] else {
        unreachable!()
    };
    assert!(output_path.contains("s01_2026-10-19_"));
    assert!(output_path.ends_with("_obs1"));

    op.send("close").await;
    op.until("Closing devices").await;
    op.send(r#"prepare:collA:{"study_id-date": "s01_2026-10-19"}"#)
        .await;
    op.until("Preparing devices").await;
    op.until("UPDATOR:-Connect-").await;

    op.send("time_test").await;
    let ping = loop {
        let line = op.next_line().await;
        if let Some(stamp) = line.strip_prefix("ping_") {
            break stamp.to_string();
        }
    };
    assert!(ping.parse::<f64>().unwrap() > 0.0);

    op.send("shutdown").await;
    tokio::time::timeout(WAIT, node.wait())
        .await
        .expect("node did not stop");
}
