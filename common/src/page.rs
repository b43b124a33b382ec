use crate::types::RelayState;

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Smart Switch</title>
<style>
body{font-family:Arial,sans-serif;text-align:center;margin-top:50px}
.switch{position:relative;display:inline-block;width:60px;height:34px}
.switch input{opacity:0;width:0;height:0}
.slider{position:absolute;cursor:pointer;inset:0;background:#ccc;border-radius:34px;transition:.3s}
.slider:before{position:absolute;content:"";height:26px;width:26px;left:4px;bottom:4px;background:#fff;border-radius:50%;transition:.3s}
input:checked+.slider{background:#2196f3}
input:checked+.slider:before{transform:translateX(26px)}
</style>
</head>
<body>
<h2>Smart Switch</h2>
<label class="switch">
"#;

const PAGE_TAIL: &str = r#"<span class="slider"></span>
</label>
<script>
function toggleRelay(){
  var el=document.getElementById('relayToggle');
  var xhttp=new XMLHttpRequest();
  xhttp.open('GET',el.checked?'/on':'/off',true);
  xhttp.send();
}
</script>
</body>
</html>
"#;

/// Control page with the toggle pre-set to `state`.
pub fn render_control_page(state: RelayState) -> String {
    let checked = if state.is_on() { " checked" } else { "" };
    format!(
        "{PAGE_HEAD}<input type=\"checkbox\" id=\"relayToggle\" onchange=\"toggleRelay()\"{checked}>\n{PAGE_TAIL}"
    )
}
