pub mod cooldown;
pub mod events;
pub mod init;
pub mod inspect;
pub mod run;
pub mod scale;

use jobscale_autoscale::{Autoscaler, ScaleError};

/// The named worker, or every registered worker when `None`.
pub(crate) fn select<'a>(
    autoscaler: &'a Autoscaler,
    worker: Option<&'a str>,
) -> Result<Vec<&'a str>, ScaleError> {
    match worker {
        Some(name) if autoscaler.get(name).is_none() => {
            Err(ScaleError::UnknownWorker(name.to_string()))
        }
        Some(name) => Ok(vec![name]),
        None => Ok(autoscaler.registered_workers()),
    }
}
