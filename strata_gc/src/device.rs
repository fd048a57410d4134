//! I/O device table.
//!
//! Devices keep chains of pending requests. A request may hold the port
//! object that issued it, and that port must survive until the request
//! completes even if nothing else refers to it. The table is shared with
//! the I/O layer through a [`DeviceHandle`].

use crate::roots::RootProvider;
use crate::series::ContextRef;
use crate::trace::Tracer;
use parking_lot::Mutex;
use std::sync::Arc;

/// Index of a device in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u16);

/// Handle to an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u32);

/// An in-flight I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub device: DeviceId,
    /// Command code.
    pub command: u16,
    /// Port object the request reports back to.
    pub port: Option<ContextRef>,
    next: Option<RequestId>,
}

#[derive(Debug)]
struct Device {
    name: String,
    pending: Option<RequestId>,
}

/// Registered devices and their pending request chains.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
    requests: Vec<Option<Request>>,
    vacant: Vec<u32>,
}

impl DeviceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device.
    pub fn add_device(&mut self, name: impl Into<String>) -> DeviceId {
        let id = DeviceId(self.devices.len() as u16);
        self.devices.push(Device {
            name: name.into(),
            pending: None,
        });
        id
    }

    /// Name a device was registered under.
    pub fn device_name(&self, device: DeviceId) -> Option<&str> {
        self.devices.get(device.0 as usize).map(|d| d.name.as_str())
    }

    /// Put a request at the head of a device's pending chain.
    pub fn queue_request(
        &mut self,
        device: DeviceId,
        command: u16,
        port: Option<ContextRef>,
    ) -> Option<RequestId> {
        let head = self.devices.get(device.0 as usize)?.pending;
        let request = Request {
            device,
            command,
            port,
            next: head,
        };
        let id = match self.vacant.pop() {
            Some(slot) => {
                self.requests[slot as usize] = Some(request);
                RequestId(slot)
            }
            None => {
                self.requests.push(Some(request));
                RequestId(self.requests.len() as u32 - 1)
            }
        };
        self.devices[device.0 as usize].pending = Some(id);
        Some(id)
    }

    /// Unlink a finished request. Returns it if it was pending.
    pub fn complete_request(&mut self, id: RequestId) -> Option<Request> {
        let request = self.requests.get_mut(id.0 as usize)?.take()?;
        let device = &mut self.devices[request.device.0 as usize];

        if device.pending == Some(id) {
            device.pending = request.next;
        } else {
            let mut cursor = device.pending;
            while let Some(current) = cursor {
                let Some(Some(entry)) = self.requests.get_mut(current.0 as usize) else {
                    break;
                };
                if entry.next == Some(id) {
                    entry.next = request.next;
                    break;
                }
                cursor = entry.next;
            }
        }
        self.vacant.push(id.0);
        Some(request)
    }

    /// A pending request.
    #[inline]
    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Pending requests of one device, most recent first.
    pub fn pending(&self, device: DeviceId) -> impl Iterator<Item = &Request> + '_ {
        let mut cursor = self
            .devices
            .get(device.0 as usize)
            .and_then(|d| d.pending);
        std::iter::from_fn(move || {
            let request = self.request(cursor?)?;
            cursor = request.next;
            Some(request)
        })
    }

    /// Number of requests in flight across all devices.
    pub fn pending_count(&self) -> usize {
        self.requests.iter().filter(|r| r.is_some()).count()
    }
}

impl RootProvider for DeviceTable {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        for index in 0..self.devices.len() {
            for request in self.pending(DeviceId(index as u16)) {
                if let Some(port) = request.port {
                    tracer.queue_context(port);
                }
            }
        }
    }
}

/// Shared handle to the device table.
#[derive(Debug, Clone, Default)]
pub struct DeviceHandle(Arc<Mutex<DeviceTable>>);

impl DeviceHandle {
    /// Create a handle around an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table.
    #[inline]
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, DeviceTable> {
        self.0.lock()
    }
}
