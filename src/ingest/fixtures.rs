/// Test fixtures: representative XML payloads from the WIMS xsql endpoints.
///
/// Trimmed to the tags the service reads plus a few pass-through tags. They
/// reflect the envelope returned by:
///   https://famprod.nwcg.gov/prod-wims/xsql/nfdrs.xsql?stn=...&type=N|F&...
///   https://famprod.nwcg.gov/prod-wims/xsql/obs.xsql?stn=...
///
/// Response shape:
///   <nfdrs>            root, tag varies by endpoint
///     <row>            one element per record
///       <nfdr_dt>      MM/DD/YYYY
///       <nfdr_tm>      reporting hour, no minutes
///       <mp>           model priority (1 = preferred)
///       <ec>, <bi>     ERC and BI
///
/// Note: every value arrives as element text, numbers included.
///
/// All fixtures assume a run date of 2024-07-22 for station 045101.

/// Observed NFDRS at 13:00 for 07/20 .. 07/22. 07/22 is reported by two
/// models; the mp=1 row (ERC 47, BI 43) must win over mp=2.
#[cfg(test)]
pub(crate) fn fixture_nfdrs_observed_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<nfdrs>
  <row>
    <sta_id>045101</sta_id>
    <sta_nm>ALPHA</sta_nm>
    <nfdr_dt>07/20/2024</nfdr_dt>
    <nfdr_tm>13</nfdr_tm>
    <nfdr_type>O</nfdr_type>
    <mp>1</mp>
    <msgc>16Y2</msgc>
    <ec>42</ec>
    <bi>38</bi>
    <sl>2-</sl>
  </row>
  <row>
    <sta_id>045101</sta_id>
    <sta_nm>ALPHA</sta_nm>
    <nfdr_dt>07/21/2024</nfdr_dt>
    <nfdr_tm>13</nfdr_tm>
    <nfdr_type>O</nfdr_type>
    <mp>1</mp>
    <msgc>16Y2</msgc>
    <ec>44</ec>
    <bi>40</bi>
    <sl>2</sl>
  </row>
  <row>
    <sta_id>045101</sta_id>
    <sta_nm>ALPHA</sta_nm>
    <nfdr_dt>07/22/2024</nfdr_dt>
    <nfdr_tm>13</nfdr_tm>
    <nfdr_type>O</nfdr_type>
    <mp>2</mp>
    <msgc>16V2</msgc>
    <ec>60</ec>
    <bi>70</bi>
    <sl>3</sl>
  </row>
  <row>
    <sta_id>045101</sta_id>
    <sta_nm>ALPHA</sta_nm>
    <nfdr_dt>07/22/2024</nfdr_dt>
    <nfdr_tm>13</nfdr_tm>
    <nfdr_type>O</nfdr_type>
    <mp>1</mp>
    <msgc>16Y2</msgc>
    <ec>47</ec>
    <bi>43</bi>
    <sl>3+</sl>
  </row>
</nfdrs>"#
}

/// Forecast NFDRS for 07/22 .. 07/25. Only 07/23 and 07/25 fall inside the
/// forecast trend window: ERC 49 -> 52 (exactly +3), BI 45 -> 41.
#[cfg(test)]
pub(crate) fn fixture_nfdrs_forecast_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<nfdrs>
  <row><nfdr_dt>07/22/2024</nfdr_dt><nfdr_tm>13</nfdr_tm><nfdr_type>F</nfdr_type><mp>1</mp><ec>48</ec><bi>44</bi></row>
  <row><nfdr_dt>07/23/2024</nfdr_dt><nfdr_tm>13</nfdr_tm><nfdr_type>F</nfdr_type><mp>1</mp><ec>49</ec><bi>45</bi></row>
  <row><nfdr_dt>07/24/2024</nfdr_dt><nfdr_tm>13</nfdr_tm><nfdr_type>F</nfdr_type><mp>1</mp><ec>50</ec><bi>43</bi></row>
  <row><nfdr_dt>07/25/2024</nfdr_dt><nfdr_tm>13</nfdr_tm><nfdr_type>F</nfdr_type><mp>1</mp><ec>52</ec><bi>41</bi></row>
</nfdrs>"#
}

/// Weather observations for 07/22. Only the 13:00 row shares a timestamp
/// with the canonical index record. `sl` clashes with the index record's tag.
#[cfg(test)]
pub(crate) fn fixture_observations_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<obs>
  <row>
    <sta_id>045101</sta_id>
    <obs_dt>07/22/2024</obs_dt>
    <obs_tm>12</obs_tm>
    <dry_temp>88</dry_temp>
    <rh>19</rh>
  </row>
  <row>
    <sta_id>045101</sta_id>
    <obs_dt>07/22/2024</obs_dt>
    <obs_tm>13</obs_tm>
    <dry_temp>91</dry_temp>
    <rh>15</rh>
    <wind_sp>7</wind_sp>
    <ppt_24>0.00</ppt_24>
    <sl>9</sl>
  </row>
</obs>"#
}

/// What WIMS returns when nothing was reported at the requested hour.
#[cfg(test)]
pub(crate) fn fixture_empty_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<nfdrs>
</nfdrs>"#
}

/// Observed NFDRS at 12:00 only, used by the hour-fallback tests.
#[cfg(test)]
pub(crate) fn fixture_nfdrs_noon_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<nfdrs>
  <row><nfdr_dt>07/20/2024</nfdr_dt><nfdr_tm>12</nfdr_tm><mp>1</mp><ec>30</ec><bi>25</bi></row>
  <row><nfdr_dt>07/22/2024</nfdr_dt><nfdr_tm>12</nfdr_tm><mp>1</mp><ec>31</ec><bi>29</bi></row>
</nfdrs>"#
}
