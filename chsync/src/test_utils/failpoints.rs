use fail::FailScenario;

/// Fail point configuration that is switched off again when dropped.
///
/// Holding the scenario serializes tests using fail points, since `fail` keeps a global
/// registry.
pub struct CustomFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<(String, String)>,
}

impl<'a> CustomFailScenario<'a> {
    /// Configures every `(name, action)` pair, e.g. `("sync_round.before_write", "return")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> CustomFailScenario<'a> {
        let scenario = FailScenario::setup();
        let failpoints = failpoints
            .iter()
            .map(|(name, action)| (name.to_string(), action.to_string()))
            .collect::<Vec<_>>();

        for (name, action) in &failpoints {
            fail::cfg(name, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints,
        }
    }

    /// Switches a single fail point off before the scenario ends.
    pub fn disable(&self, name: &str) {
        fail::cfg(name, "off").unwrap();
    }

    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for CustomFailScenario<'_> {
    fn drop(&mut self) {
        for (name, _) in &self.failpoints {
            fail::cfg(name, "off").unwrap();
        }
    }
}
