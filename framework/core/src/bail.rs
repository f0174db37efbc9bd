/// Return this error from an entry function to indicate that the virtual user is bailing.
///
/// This should be used when a virtual user hits an error that makes further iterations pointless
/// for that virtual user, but not for the scenario. The iteration is recorded as failed, the
/// virtual user is not rescheduled and every other virtual user keeps running.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct VuBailError {
    msg: String,
}

impl VuBailError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Default for VuBailError {
    fn default() -> Self {
        Self::new("Virtual user is bailing")
    }
}
