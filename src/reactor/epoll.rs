//! The concrete readiness backend: Linux epoll via raw `libc` bindings,
//! implementing the `Poller` trait (spec.md §4.A).

use std::os::fd::RawFd;
use std::time::Duration;

use super::{Mask, Poller};

pub struct EpollPoller {
    epfd: RawFd,
    events_buf: Vec<libc::epoll_event>,
}

impl EpollPoller {
    pub fn new() -> std::io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(0) };
        if epfd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { epfd, events_buf: vec![unsafe { std::mem::zeroed() }; 1024] })
    }

    fn to_events(mask: Mask) -> u32 {
        let mut ev = 0u32;
        if mask.contains(Mask::READABLE) {
            ev |= libc::EPOLLIN as u32;
        }
        if mask.contains(Mask::WRITABLE) {
            ev |= libc::EPOLLOUT as u32;
        }
        ev
    }

    fn ctl(&mut self, op: i32, fd: RawFd, mask: Mask) {
        let mut ev = libc::epoll_event {
            events: Self::to_events(mask),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            tracing::warn!(fd, "epoll_ctl failed: {}", std::io::Error::last_os_error());
        }
    }
}

impl Poller for EpollPoller {
    fn add(&mut self, fd: RawFd, mask: Mask) {
        self.ctl(libc::EPOLL_CTL_ADD, fd, mask);
    }

    fn modify(&mut self, fd: RawFd, mask: Mask) {
        self.ctl(libc::EPOLL_CTL_MOD, fd, mask);
    }

    fn delete(&mut self, fd: RawFd) {
        let mut ev: libc::epoll_event = unsafe { std::mem::zeroed() };
        unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut ev) };
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Vec<(RawFd, Mask)> {
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events_buf.as_mut_ptr(),
                self.events_buf.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                tracing::warn!("epoll_wait failed: {err}");
            }
            return Vec::new();
        }
        let mut out = Vec::with_capacity(n as usize);
        for ev in &self.events_buf[..n as usize] {
            let mut mask = Mask::empty();
            if ev.events & (libc::EPOLLIN as u32) != 0 {
                mask |= Mask::READABLE;
            }
            if ev.events & (libc::EPOLLOUT as u32) != 0 {
                mask |= Mask::WRITABLE;
            }
            if ev.events & (libc::EPOLLHUP as u32 | libc::EPOLLERR as u32) != 0 {
                mask |= Mask::READABLE;
            }
            out.push((ev.u64 as RawFd, mask));
        }
        out
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}
