use crate::report::Reporter;
use crate::sample::{CheckResult, SampleTags};
use std::time::SystemTime;

/// A named predicate over a value.
pub type Assertion<'a, T> = (&'a str, &'a dyn Fn(&T) -> bool);

/// Evaluate every assertion against `value`, recording one [CheckResult] per assertion.
///
/// Returns true only if all of the assertions passed. A failed assertion is never an error, the
/// caller decides whether to skip work that depended on it.
pub fn check<T: ?Sized>(
    reporter: &Reporter,
    tags: &SampleTags,
    value: &T,
    assertions: &[Assertion<'_, T>],
) -> bool {
    let mut all_passed = true;

    for (name, predicate) in assertions {
        let passed = predicate(value);
        if !passed {
            log::debug!("Check failed for vu {}: {}", tags.vu_id, name);
        }

        reporter.add_check(CheckResult {
            name: name.to_string(),
            passed,
            timestamp: SystemTime::now(),
            tags: tags.clone(),
        });

        all_passed &= passed;
    }

    all_passed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_every_assertion() {
        let reporter = Reporter::new(Vec::new());
        let tags = SampleTags::new("s", 1);
        let status = 201u16;

        let passed = check(
            &reporter,
            &tags,
            &status,
            &[
                ("is created", &|s: &u16| *s == 201),
                ("is not an error", &|s: &u16| *s < 400),
            ],
        );
        assert!(passed);

        let failed = check(
            &reporter,
            &tags,
            &status,
            &[
                ("is ok", &|s: &u16| *s == 200),
                ("is not an error", &|s: &u16| *s < 400),
            ],
        );
        assert!(!failed);

        let totals = reporter.snapshot().totals;
        assert_eq!(4, totals.checks_total);
        assert_eq!(3, totals.checks_passed);
    }

    #[test]
    fn no_assertions_pass() {
        let reporter = Reporter::new(Vec::new());
        assert!(check::<str>(&reporter, &SampleTags::default(), "x", &[]));
        assert_eq!(0, reporter.snapshot().totals.checks_total);
    }
}
