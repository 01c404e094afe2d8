use std::{
    ffi::{OsStr, OsString},
    process::Command,
};

/// Builds a `std::process::Command` that can still be rewrapped with an outer
/// program (`sudo`, `sudo -u <user>`, ...) before being spawned.
#[derive(Debug)]
pub struct CommandBuilder {
    program: OsString,
    argv: Vec<OsString>,
}

impl CommandBuilder {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            argv: Vec::new(),
        }
    }

    pub fn build(self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.argv);
        command
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.argv.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn wrap<S, I, T>(&mut self, wrapper: S, wrapper_args: I) -> &mut Self
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = T>,
        T: AsRef<OsStr>,
    {
        let mut new_argv = Vec::new();

        // Add wrapper arguments first
        for arg in wrapper_args {
            new_argv.push(arg.as_ref().to_owned());
        }

        // Add the current program
        new_argv.push(self.program.clone());

        // Add the current arguments
        new_argv.extend(self.argv.iter().cloned());

        // Update program to wrapper and argv to the new argument list
        self.program = wrapper.as_ref().to_owned();
        self.argv = new_argv;
        self
    }

    /// Returns the command line as a string for debugging/testing purposes
    pub fn as_command_line(&self) -> String {
        let mut parts: Vec<String> = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(
            self.argv
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        shell_words::join(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_with_args() {
        let mut builder = CommandBuilder::new("ls");
        builder.arg("-la").wrap("sudo", ["-n"]);
        assert_eq!(builder.as_command_line(), "sudo -n ls -la");
    }

    #[test]
    fn test_wrap_as_user() {
        let mut builder = CommandBuilder::new("sleep");
        builder.arg("10").wrap("sudo", ["-n", "-u", "nobody"]);
        assert_eq!(builder.as_command_line(), "sudo -n -u nobody sleep 10");
    }

    #[test]
    fn test_wrap_and_build() {
        let mut builder = CommandBuilder::new("ls");
        builder.arg("-la").wrap("sudo", ["-n"]);

        let cmd = builder.build();
        assert_eq!(cmd.get_program(), "sudo");

        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, vec!["-n", "ls", "-la"]);
    }

    #[test]
    fn test_wrap_with_spaces() {
        let mut builder = CommandBuilder::new("echo");
        builder.arg("hello world").wrap("bash", ["-c"]);
        assert_eq!(builder.as_command_line(), "bash -c echo 'hello world'");
    }
}
