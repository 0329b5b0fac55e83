//! flock 文件锁（HITL 快照与反思日志的并发写保护）
//!
//! 锁随文件句柄关闭自动释放；非 Unix 平台为空操作。

use std::io;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

#[cfg(unix)]
#[allow(unsafe_code)]
fn flock(file: &std::fs::File, op: libc::c_int) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` 来自仍然存活的 `std::fs::File`，`op` 是合法的 flock 操作
    let rc = unsafe { libc::flock(fd, op) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// 阻塞获取排他锁
#[cfg(unix)]
pub fn lock_exclusive(file: &std::fs::File) -> io::Result<()> {
    flock(file, libc::LOCK_EX)
}

/// 阻塞获取共享锁
#[cfg(unix)]
pub fn lock_shared(file: &std::fs::File) -> io::Result<()> {
    flock(file, libc::LOCK_SH)
}

#[cfg(not(unix))]
pub fn lock_exclusive(_: &std::fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn lock_shared(_: &std::fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_and_relock_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        {
            let f = std::fs::File::create(&path).unwrap();
            lock_exclusive(&f).unwrap();
        }
        let f = std::fs::File::open(&path).unwrap();
        lock_shared(&f).unwrap();
    }
}
