use crate::device::DeviceArrival;

pub enum DaemonEvent {
    /// A plug-and-play device was attached to the machine.
    DeviceArrived(DeviceArrival),
    /// The settings file changed on disk (external edit or the config UI).
    SettingsChanged,
    /// Ctrl+C received; the daemon should stop monitoring and exit.
    Shutdown,
}
