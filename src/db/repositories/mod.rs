mod capture_sessions;
