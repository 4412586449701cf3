//! Git output parsing helpers.

use std::process::Output;

use super::types::{PushFlag, PushRefStatus};

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses the ref lines of `git push --porcelain` stdout.
///
/// Lines have the form `<flag>\t<from>:<to>\t<summary>`; the `To <url>` header
/// and trailing `Done` are skipped.
pub fn parse_push_porcelain(stdout: &str) -> Vec<PushRefStatus> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let flag_part = parts.next()?;
            let refs = parts.next()?;
            let summary = parts.next().unwrap_or("").trim();

            let mut chars = flag_part.chars();
            let flag = PushFlag::from_char(chars.next()?)?;
            if chars.next().is_some() {
                return None;
            }

            let (source, destination) = refs.split_once(':')?;
            Some(PushRefStatus {
                flag,
                source: source.to_string(),
                destination: destination.to_string(),
                summary: summary.to_string(),
            })
        })
        .collect()
}

/// Finds the status line for a destination ref.
pub fn find_ref_status<'a>(
    statuses: &'a [PushRefStatus],
    destination: &str,
) -> Option<&'a PushRefStatus> {
    statuses.iter().find(|s| s.destination == destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::git::types::PushRejection;

    const BRANCH: &str = "refs/heads/image_updater_app_service_dev_v2";

    fn single(output: &str) -> PushRefStatus {
        let statuses = parse_push_porcelain(output);
        assert_eq!(statuses.len(), 1, "statuses: {statuses:?}");
        statuses.into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_new_branch() {
        let status = single(&format!(
            "To https://github.com/org/repo.git\n*\t{BRANCH}:{BRANCH}\t[new branch]\nDone\n"
        ));
        assert_eq!(status.flag, PushFlag::New);
        assert_eq!(status.destination, BRANCH);
        assert_eq!(status.rejection(), None);
    }

    #[test]
    fn test_parse_non_fast_forward() {
        let status = single(&format!(
            "To /tmp/remote.git\n!\t{BRANCH}:{BRANCH}\t[rejected] (non-fast-forward)\nDone\n"
        ));
        assert_eq!(status.rejection(), Some(PushRejection::NonFastForward));
    }

    #[test]
    fn test_parse_fetch_first() {
        let status = single(&format!(
            "To /tmp/remote.git\n!\t{BRANCH}:{BRANCH}\t[rejected] (fetch first)\nDone\n"
        ));
        assert_eq!(status.rejection(), Some(PushRejection::NonFastForward));
    }

    #[test]
    fn test_parse_remote_rejected() {
        let status = single(&format!(
            "To /tmp/remote.git\n!\t{BRANCH}:{BRANCH}\t[remote rejected] (pre-receive hook declined)\nDone\n"
        ));
        assert_eq!(
            status.rejection(),
            Some(PushRejection::RemoteRejected(
                "pre-receive hook declined".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_up_to_date() {
        let status = single(&format!("To /tmp/remote.git\n=\t{BRANCH}:{BRANCH}\t[up to date]\nDone\n"));
        assert_eq!(status.flag, PushFlag::UpToDate);
    }

    #[test]
    fn test_parse_fast_forward_summary() {
        let status = single(&format!("To /tmp/remote.git\n \t{BRANCH}:{BRANCH}\t1a2b3c4..5d6e7f8\nDone\n"));
        assert_eq!(status.flag, PushFlag::FastForward);
        assert_eq!(status.summary, "1a2b3c4..5d6e7f8");
    }

    #[test]
    fn test_find_ref_status() {
        let statuses = parse_push_porcelain(&format!(
            "*\trefs/heads/other:refs/heads/other\t[new branch]\n!\t{BRANCH}:{BRANCH}\t[rejected] (non-fast-forward)\n"
        ));
        let found = find_ref_status(&statuses, BRANCH).unwrap();
        assert_eq!(found.flag, PushFlag::Rejected);
        assert!(find_ref_status(&statuses, "refs/heads/missing").is_none());
    }

    #[cfg(unix)]
    mod unix_tests {
        use super::*;
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        fn make_output(status_code: i32, stdout: &[u8], stderr: &[u8]) -> Output {
            Output {
                status: ExitStatus::from_raw(status_code << 8),
                stdout: stdout.to_vec(),
                stderr: stderr.to_vec(),
            }
        }

        #[test]
        fn test_format_git_error_empty_output() {
            let output = make_output(1, b"", b"");
            assert_eq!(format_git_error(&output), "Command failed with exit code 1");
        }

        #[test]
        fn test_format_git_error_both() {
            let output = make_output(128, b"some output", b"fatal: some error");
            assert_eq!(format_git_error(&output), "fatal: some error\nsome output");
        }
    }
}
