use itertools::Itertools;
use crate::error::ErrorKind;

///
/// The notification boundary. Transport (email, chat webhooks) lives outside
/// the engine; the pipeline calls this exactly once per terminal failure.
///
/// File problems - bad headers, breached thresholds, failed audits,
/// duplicates - go to the source's own recipients with the data team always
/// copied in. Internal errors go to the internal channel only.
///
pub trait Notifier: Send + Sync {
    fn file_problem(&self, filename: &str, kind: ErrorKind, message: &str, recipients: &[String]);

    fn internal_error(&self, context: &str, message: &str);
}

///
/// The shipped implementation writes structured log records for an external
/// shipper to pick up.
///
pub struct LogNotifier {
    data_team: Option<String>,
}

impl LogNotifier {
    pub fn new(data_team: Option<String>) -> Self {
        Self { data_team }
    }
}

impl Notifier for LogNotifier {
    fn file_problem(&self, filename: &str, kind: ErrorKind, message: &str, recipients: &[String]) {
        let recipients = recipients.iter()
            .map(|r| r.as_str())
            .chain(self.data_team.as_deref())
            .join(", ");

        log::error!("NOTIFY file-problem [{kind}] file={filename} to={recipients}: {message}",
            kind = kind.as_str(),
            filename = filename,
            recipients = recipients,
            message = message);
    }

    fn internal_error(&self, context: &str, message: &str) {
        log::error!("NOTIFY internal-error context={}: {}", context, message);
    }
}
