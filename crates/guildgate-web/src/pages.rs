//! Embedded HTML for the browser-facing routes.

pub const LANDING: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8" />
  <title>GuildGate</title>
  <style>
    body { font-family: ui-monospace, SFMono-Regular, Menlo, monospace; margin: 24px; background: #f7f9fc; color: #14213d; }
    .card { background: white; border: 1px solid #dfe7f3; border-radius: 10px; padding: 24px; max-width: 480px; }
    a.button { display: inline-block; padding: 8px 16px; background: #5865f2; color: white; border-radius: 6px; text-decoration: none; }
  </style>
</head>
<body>
  <div class="card">
    <h1>GuildGate</h1>
    <p>Sign in with Discord to reach the member dashboard.</p>
    <a class="button" href="/auth/discord">Login with Discord</a>
  </div>
</body>
</html>"#;

pub const AUTH_FAILED: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8" />
  <title>GuildGate - Authentication Failed</title>
  <style>
    body { font-family: ui-monospace, SFMono-Regular, Menlo, monospace; margin: 24px; background: #f7f9fc; color: #14213d; }
    .card { background: white; border: 1px solid #f3dfdf; border-radius: 10px; padding: 24px; max-width: 480px; }
  </style>
</head>
<body>
  <div class="card">
    <h1>Authentication failed</h1>
    <p>You must be a member of the community with the required role to sign in.</p>
    <p><a href="/">Back to start</a></p>
  </div>
</body>
</html>"#;

/// Dashboard shell; the snapshot itself is loaded client-side from
/// `/api/user` so the page always reflects the live role check.
pub const DASHBOARD: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8" />
  <title>GuildGate Dashboard</title>
  <style>
    body { font-family: ui-monospace, SFMono-Regular, Menlo, monospace; margin: 24px; background: #f7f9fc; color: #14213d; }
    .grid { display: grid; grid-template-columns: 1fr 1fr; gap: 16px; }
    .card { background: white; border: 1px solid #dfe7f3; border-radius: 10px; padding: 12px; }
    img { border-radius: 50%; width: 64px; }
    pre { white-space: pre-wrap; }
  </style>
</head>
<body>
  <h1>Member Dashboard</h1>
  <p><a href="/logout">Log out</a></p>
  <div class="grid">
    <div class="card"><h3>Profile</h3><img id="avatar" alt="" /><pre id="profile"></pre></div>
    <div class="card"><h3>Membership</h3><pre id="membership"></pre></div>
    <div class="card"><h3>Connections</h3><pre id="connections"></pre></div>
    <div class="card"><h3>Guilds</h3><pre id="guilds"></pre></div>
  </div>
  <script>
    async function loadUser() {
      const res = await fetch('/api/user');
      if (!res.ok) { window.location = '/'; return; }
      const user = await res.json();
      document.getElementById('avatar').src = user.avatar;
      document.getElementById('profile').textContent =
        `id=${user.id}\nusername=${user.username}#${user.discriminator}\nemail=${user.email}\nlocale=${user.locale}\nmfa=${user.mfa_enabled}\nverified=${user.verified}\nnitro=${user.nitro}`;
      document.getElementById('membership').textContent =
        `joined=${user.joined_at}\nnickname=${user.nickname}\nroles=${user.roles.join(', ')}`;
      document.getElementById('connections').textContent = user.connections.join('\n') || 'none';
      document.getElementById('guilds').textContent = user.guilds.join('\n') || 'none';
    }
    loadUser();
  </script>
</body>
</html>"#;
