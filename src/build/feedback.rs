use colored::*;

pub struct FeedbackAnalyzer;

impl FeedbackAnalyzer {
    pub fn analyze(output: &str) -> Option<String> {
        // 1. Two sketches' entry points in one build (stale src/ contents)
        if output.contains("multiple definition of `setup'")
            || output.contains("multiple definition of `loop'")
            || output.contains("redefinition of 'void setup()'")
            || output.contains("redefinition of 'void loop()'")
        {
            return Some(format!(
                "Two sketches define {} or {} in the same build.\nA previous example may have left files behind. Re-run with {}.",
                "setup()".bold().yellow(),
                "loop()".bold().yellow(),
                "--force-rebuild".bold().green()
            ));
        }

        // 2. Missing header (compiler error)
        if output.contains("fatal error: ") && output.contains("No such file or directory") {
            return Some(format!(
                "It looks like a {} error.\nThe header may be missing from the library, or this board lacks it.\nCheck {} and the board's {} in sweep.toml.",
                "Missing Header".bold().red(),
                "[project].libs".bold().yellow(),
                "platform_packages".bold().yellow()
            ));
        }

        // 3. Generic linker error
        if output.contains("undefined reference to") {
            return Some(format!(
                "It looks like a {} error.\nA source file may not be compiled for this board, or a define disables it.\nCheck the example's {} and the board's {}.",
                "Linker".bold().red(),
                ".cpp files".bold().yellow(),
                "defines".bold().yellow()
            ));
        }

        // 4. Flash or RAM overflow
        if output.contains("will not fit in region") || output.contains("region `FLASH' overflowed") {
            return Some(format!(
                "The example is {} for this board.\nExclude it for this board with {}.",
                "too large".bold().red(),
                "--exclude-examples".bold().green()
            ));
        }

        None
    }
}
