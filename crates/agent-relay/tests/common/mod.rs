use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay::{
    AgentRuntime, MessageProducer, Query, QueryControl, QueryOptions, RelayError, Result,
    RuntimeOutput, SdkUserMessage,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

struct MockState {
    launches: AtomicUsize,
    interrupts: Arc<AtomicUsize>,
    fail_launch: AtomicBool,
    options: Mutex<Vec<QueryOptions>>,
    output: Mutex<Option<mpsc::Sender<Result<RuntimeOutput>>>>,
    inputs_tx: mpsc::UnboundedSender<SdkUserMessage>,
    inputs_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SdkUserMessage>>,
}

/// 记录输入、由测试驱动输出的运行时。
#[derive(Clone)]
pub struct MockRuntime {
    state: Arc<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(MockState {
                launches: AtomicUsize::new(0),
                interrupts: Arc::new(AtomicUsize::new(0)),
                fail_launch: AtomicBool::new(false),
                options: Mutex::new(Vec::new()),
                output: Mutex::new(None),
                inputs_tx,
                inputs_rx: tokio::sync::Mutex::new(inputs_rx),
            }),
        }
    }

    pub fn fail_next_launch(&self) {
        self.state.fail_launch.store(true, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<QueryOptions> {
        self.state
            .options
            .lock()
            .expect("options lock")
            .last()
            .cloned()
    }

    /// 等待运行时从生产者拉到下一条输入。
    pub async fn next_input(&self, wait: Duration) -> Option<SdkUserMessage> {
        let mut inputs = self.state.inputs_rx.lock().await;
        tokio::time::timeout(wait, inputs.recv()).await.ok().flatten()
    }

    pub async fn emit(&self, item: RuntimeOutput) {
        let sender = self.output_sender();
        sender.send(Ok(item)).await.expect("query output should be open");
    }

    pub async fn fail(&self, message: &str) {
        let sender = self.output_sender();
        sender
            .send(Err(RelayError::Runtime(message.to_string())))
            .await
            .expect("query output should be open");
        self.finish();
    }

    /// 结束当前查询的输出流。
    pub fn finish(&self) {
        self.state.output.lock().expect("output lock").take();
    }

    fn output_sender(&self) -> mpsc::Sender<Result<RuntimeOutput>> {
        self.state
            .output
            .lock()
            .expect("output lock")
            .clone()
            .expect("query should be running")
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock-runtime"
    }

    async fn query(&self, mut prompt: MessageProducer, options: QueryOptions) -> Result<Query> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_launch.swap(false, Ordering::SeqCst) {
            return Err(RelayError::Runtime("mock launch failure".to_string()));
        }
        self.state.options.lock().expect("options lock").push(options);

        let (output_tx, output_rx) = mpsc::channel(64);
        *self.state.output.lock().expect("output lock") = Some(output_tx);

        let inputs = self.state.inputs_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = prompt.next().await {
                if inputs.send(message).is_err() {
                    break;
                }
            }
        });

        let (control, mut control_rx) = QueryControl::channel();
        let interrupts = self.state.interrupts.clone();
        tokio::spawn(async move {
            while control_rx.recv().await.is_some() {
                interrupts.fetch_add(1, Ordering::SeqCst);
            }
        });

        Ok(Query {
            output: output_rx,
            control,
        })
    }
}
