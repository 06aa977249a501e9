//! The verb registry: each workflow contributes its argument declarations
//! and a run function, and the main entrypoint does nothing but registration
//! and lookup.

use modelport_core::errors::PortResult;

pub trait Command {
    fn name(&self) -> &'static str;
    /// Completes the verb's clap declaration (arguments, about text).
    fn add_subcommand(&self, command: clap::Command<'static>) -> clap::Command<'static>;
    fn run(&self, matches: &clap::ArgMatches) -> PortResult<()>;
}

pub fn registry() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(crate::export::Export),
        Box::new(crate::test::Test),
        Box::new(crate::profile::Profile),
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verbs_are_unique() {
        let commands = registry();
        let names: Vec<&str> = commands.iter().map(|c| c.name()).collect();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names, deduped);
        assert!(names.contains(&"export"));
        assert!(names.contains(&"test"));
        assert!(names.contains(&"profile"));
    }
}
