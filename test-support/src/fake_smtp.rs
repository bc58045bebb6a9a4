use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{
    net::IpAddr,
    sync::{Once, OnceLock},
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Mutex,
    },
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "contact-form.test";
const MAIL_WAIT: Duration = Duration::from_secs(1);

fn serve_in_background<HandlerT: Handler + Clone + Send + 'static>(handler: HandlerT, port: u16) {
    let mut server = Server::new(handler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("0.0.0.0:{port}"))
        .unwrap();
    std::thread::spawn(move || {
        let _ = server.serve();
    });
}

#[derive(Clone)]
struct MailRecorder {
    data: Vec<u8>,
    mail: UnboundedSender<String>,
}

impl Handler for MailRecorder {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.data.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let content = String::from_utf8_lossy(&std::mem::take(&mut self.data)).into_owned();
        debug!("Recorded mail:\n{content}");
        // The receiver lives as long as the process.
        let _ = self.mail.send(content);
        mailin_embedded::response::OK
    }
}

/// Plain-text SMTP server on [`SMTP_PORT`] which accepts every mail and hands out the raw content.
pub struct FakeSmtpServer {
    mail: Mutex<UnboundedReceiver<String>>,
}

impl FakeSmtpServer {
    /// The process-wide server, started on first use, with any mail from earlier tests discarded.
    pub async fn running() -> &'static Self {
        static SERVER: OnceLock<FakeSmtpServer> = OnceLock::new();
        let server = SERVER.get_or_init(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            serve_in_background(
                MailRecorder {
                    data: Vec::new(),
                    mail: sender,
                },
                SMTP_PORT,
            );
            FakeSmtpServer {
                mail: Mutex::new(receiver),
            }
        });
        let mut mail = server.mail.lock().await;
        while mail.try_recv().is_ok() {}
        drop(mail);
        server
    }

    /// Raw content, headers included, of the next mail to arrive within a second.
    pub async fn next_mail(&self) -> Option<String> {
        let mut mail = self.mail.lock().await;
        timeout(MAIL_WAIT, mail.recv()).await.ok().flatten()
    }

    pub fn url() -> String {
        format!("smtp://localhost:{SMTP_PORT}")
    }
}

#[derive(Clone)]
struct RejectEverything;

impl Handler for RejectEverything {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts, on first call, an SMTP server which rejects every transaction, and returns its URL.
pub fn poisoned_smtp_url() -> String {
    static STARTED: Once = Once::new();
    STARTED.call_once(|| serve_in_background(RejectEverything, POISONED_SMTP_PORT));
    format!("smtp://localhost:{POISONED_SMTP_PORT}")
}
