/// Completion flags of the four badge tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskStatus {
    pub email: bool,
    pub telegram: bool,
    pub discord: bool,
    pub twitter: bool,
}

impl TaskStatus {
    pub fn all_completed(&self) -> bool {
        self.email && self.telegram && self.discord && self.twitter
    }
}
